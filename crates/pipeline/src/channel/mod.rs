//! At-least-once message channel.
//!
//! A received message is leased, not removed: it stays invisible for the
//! visibility timeout of the receive that leased it and becomes deliverable
//! again unless it is deleted with the receipt handle of that lease. This is
//! the only retry mechanism the pipeline has.

mod durable;
mod memory;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::durable::LibsqlChannel;
pub use self::memory::MemoryChannel;

/// Opaque string attributes travelling next to a body.
pub type MessageAttributes = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    /// Messages sharing a group key are delivered one at a time, in send order.
    pub group_key: Option<String>,
    pub attributes: MessageAttributes,
}

impl OutgoingMessage {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body, group_key: None, attributes: MessageAttributes::new() }
    }

    pub fn with_group_key(mut self, group_key: impl Into<String>) -> Self {
        self.group_key = Some(group_key.into());
        self
    }

    pub fn with_attributes(mut self, attributes: MessageAttributes) -> Self {
        self.attributes.extend(attributes);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub body: Vec<u8>,
    /// Handle of this particular lease; required to delete the message.
    pub receipt_handle: String,
    pub attributes: MessageAttributes,
    /// How many times the message has been leased, this lease included.
    pub receive_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    pub max_messages: usize,
    /// Long-poll wait when nothing is immediately available.
    pub wait: Duration,
    /// Lease duration of the messages returned by this receive.
    pub visibility_timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 1,
            wait: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

impl ReceiveOptions {
    fn check(&self) -> Result<(), ChannelError> {
        if self.max_messages == 0 {
            return Err(ChannelError::InvalidOptions("max_messages must be at least 1".into()));
        }
        Ok(())
    }
}

/// Behaviour shared by every queue of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Receives allowed before a message is dead-lettered instead of leased.
    /// `None` redelivers forever.
    pub max_receive_count: Option<u32>,
    /// Re-check interval while long-polling an empty queue.
    pub poll_interval: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self { max_receive_count: None, poll_interval: Duration::from_millis(200) }
    }
}

/// A message moved out of its queue after too many receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: String,
    pub queue: String,
    pub body: Vec<u8>,
    pub attributes: MessageAttributes,
    pub receive_count: u32,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("channel pool error: {0}")]
    Pool(String),

    #[error("receipt handle {receipt_handle} is not the current lease of any message in {queue}")]
    UnknownReceipt { queue: String, receipt_handle: String },

    #[error("message attributes could not be stored: {0}")]
    Attributes(#[from] serde_json::Error),

    #[error("invalid receive options: {0}")]
    InvalidOptions(String),
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Enqueue a message and return its id.
    async fn send(&self, queue: &str, message: OutgoingMessage) -> Result<String, ChannelError>;

    /// Lease up to `options.max_messages` messages, waiting up to
    /// `options.wait` for the first one. An empty result is not an error.
    async fn receive(
        &self,
        queue: &str,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, ChannelError>;

    /// Acknowledge a leased message.
    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), ChannelError>;
}
