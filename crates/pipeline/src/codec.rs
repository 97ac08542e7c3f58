//! JSON codec for queue bodies.
//!
//! Decoding is eager: a body is parsed, checked against the infrastructure
//! test-event sentinel, deserialised into its one canonical schema and then
//! validated. Any failure is a [`DecodeError`] naming the message it came from.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Value of the `Event` field object storage puts in the test notification it
/// sends when a queue is first attached to a bucket.
pub const TEST_EVENT_SENTINEL: &str = "s3:TestEvent";

/// Semantic checks that go beyond what the schema can express.
pub trait Validate {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Result of a successful decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    Valid(T),
    /// An infrastructure test event: acknowledge it and do nothing else.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    MalformedJson,
    Schema,
    Validation,
}

impl std::fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeErrorKind::MalformedJson => write!(f, "malformed json"),
            DecodeErrorKind::Schema => write!(f, "schema mismatch"),
            DecodeErrorKind::Validation => write!(f, "validation failed"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("message {message_id} could not be decoded ({kind}): {detail}")]
pub struct DecodeError {
    pub message_id: String,
    pub kind: DecodeErrorKind,
    pub detail: String,
}

impl DecodeError {
    fn new(message_id: &str, kind: DecodeErrorKind, detail: impl ToString) -> Self {
        Self { message_id: message_id.to_string(), kind, detail: detail.to_string() }
    }
}

pub fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(payload)
}

pub fn decode<T>(message_id: &str, body: &[u8]) -> Result<Decoded<T>, DecodeError>
where
    T: DeserializeOwned + Validate,
{
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| DecodeError::new(message_id, DecodeErrorKind::MalformedJson, e))?;

    if is_test_event(&value) {
        return Ok(Decoded::Skip);
    }

    let payload: T = serde_json::from_value(value)
        .map_err(|e| DecodeError::new(message_id, DecodeErrorKind::Schema, e))?;

    payload
        .validate()
        .map_err(|detail| DecodeError::new(message_id, DecodeErrorKind::Validation, detail))?;

    Ok(Decoded::Valid(payload))
}

fn is_test_event(value: &Value) -> bool {
    value.get("Event").and_then(Value::as_str) == Some(TEST_EVENT_SENTINEL)
}
