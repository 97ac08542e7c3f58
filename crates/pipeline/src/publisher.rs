use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::channel::{MessageChannel, OutgoingMessage};
use crate::codec::encode;
use crate::correlation::CorrelationContext;
use crate::error::ProcessingError;

/// Sends typed payloads to one queue, stamping the correlation attribute.
#[derive(Clone)]
pub struct Publisher {
    channel: Arc<dyn MessageChannel>,
    queue: String,
}

impl Publisher {
    pub fn new(channel: Arc<dyn MessageChannel>, queue: impl Into<String>) -> Self {
        Self { channel, queue: queue.into() }
    }

    pub async fn publish<T>(
        &self,
        payload: &T,
        context: &CorrelationContext,
        group_key: Option<String>,
    ) -> Result<String, ProcessingError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let mut message = OutgoingMessage::new(encode(payload)?).with_attributes(context.to_attributes());
        message.group_key = group_key;

        let message_id = self.channel.send(&self.queue, message).await?;
        debug!(queue = %self.queue, %message_id, correlation_id = %context.correlation_id, "Published message");
        Ok(message_id)
    }
}
