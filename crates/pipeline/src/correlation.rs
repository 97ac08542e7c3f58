use tracing::{Span, info_span, warn};
use uuid::Uuid;

use crate::channel::MessageAttributes;

/// Message attribute that carries the correlation id between processes.
pub const CORRELATION_ID_ATTRIBUTE: &str = "correlationId";

/// Identifies one message chain across every stage that touches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    pub correlation_id: Uuid,
    pub service_name: String,
    pub message_id: Option<String>,
}

impl CorrelationContext {
    /// Start a new chain.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self { correlation_id: Uuid::new_v4(), service_name: service_name.into(), message_id: None }
    }

    /// Continue the chain a received message belongs to.
    ///
    /// A missing or unparsable correlation attribute starts a fresh chain
    /// instead of failing, so the message can still be processed and logged.
    pub fn from_attributes(
        attributes: &MessageAttributes,
        service_name: &str,
        message_id: Option<&str>,
    ) -> Self {
        let correlation_id = match attributes.get(CORRELATION_ID_ATTRIBUTE) {
            Some(raw) => Uuid::parse_str(raw).unwrap_or_else(|e| {
                let fresh = Uuid::new_v4();
                warn!(
                    message_id = message_id.unwrap_or("-"),
                    "Invalid correlation id {raw:?} ({e}), using {fresh}"
                );
                fresh
            }),
            None => {
                let fresh = Uuid::new_v4();
                warn!(
                    message_id = message_id.unwrap_or("-"),
                    "Message carries no correlation id, using {fresh}"
                );
                fresh
            }
        };

        Self {
            correlation_id,
            service_name: service_name.to_string(),
            message_id: message_id.map(str::to_string),
        }
    }

    pub fn to_attributes(&self) -> MessageAttributes {
        let mut attributes = MessageAttributes::new();
        attributes.insert(CORRELATION_ID_ATTRIBUTE.to_string(), self.correlation_id.to_string());
        attributes
    }

    /// Span whose fields end up on every log line emitted while it is entered.
    pub fn span(&self) -> Span {
        info_span!(
            "message",
            correlation_id = %self.correlation_id,
            service = %self.service_name,
            message_id = self.message_id.as_deref().unwrap_or("-"),
        )
    }
}
