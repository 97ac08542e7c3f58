//! Receive / handle / acknowledge loop.
//!
//! One invocation of [`Consumer::run_once`] receives at most one batch and
//! handles its messages one at a time. A message is deleted only after its
//! handler succeeded; on failure the message stays leased and the error goes
//! back to whoever drives the loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, error, info};

use crate::channel::{MessageChannel, ReceiveOptions, ReceivedMessage};
use crate::codec::{Decoded, Validate, decode};
use crate::correlation::CorrelationContext;
use crate::error::ProcessingError;

/// Stage-specific work done for one decoded message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    type Payload: DeserializeOwned + Validate + Send;

    async fn handle(
        &self,
        payload: Self::Payload,
        context: &CorrelationContext,
    ) -> Result<(), ProcessingError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub queue: String,
    pub max_messages: usize,
    pub wait: Duration,
    pub visibility_timeout: Duration,
}

impl ConsumerConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        let defaults = ReceiveOptions::default();
        Self {
            queue: queue.into(),
            max_messages: defaults.max_messages,
            wait: defaults.wait,
            visibility_timeout: defaults.visibility_timeout,
        }
    }

    fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: self.max_messages,
            wait: self.wait,
            visibility_timeout: self.visibility_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The long-poll wait elapsed without a message.
    Empty,
    Completed { handled: usize, skipped: usize },
}

enum Delivery {
    Handled,
    Skipped,
}

pub struct Consumer {
    channel: Arc<dyn MessageChannel>,
    config: ConsumerConfig,
    service_name: String,
}

impl Consumer {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        config: ConsumerConfig,
        service_name: impl Into<String>,
    ) -> Self {
        Self { channel, config, service_name: service_name.into() }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub async fn run_once<H: MessageHandler>(
        &self,
        handler: &H,
    ) -> Result<ConsumeOutcome, ProcessingError> {
        let messages = self.channel.receive(&self.config.queue, &self.config.receive_options()).await?;

        if messages.is_empty() {
            debug!(queue = %self.config.queue, "No messages available");
            return Ok(ConsumeOutcome::Empty);
        }

        let (mut handled, mut skipped) = (0, 0);
        for message in messages {
            let context = CorrelationContext::from_attributes(
                &message.attributes,
                &self.service_name,
                Some(&message.message_id),
            );
            let span = context.span();

            match self.process(handler, &message, &context).instrument(span).await? {
                Delivery::Handled => handled += 1,
                Delivery::Skipped => skipped += 1,
            }
        }

        Ok(ConsumeOutcome::Completed { handled, skipped })
    }

    async fn process<H: MessageHandler>(
        &self,
        handler: &H,
        message: &ReceivedMessage,
        context: &CorrelationContext,
    ) -> Result<Delivery, ProcessingError> {
        let payload = match decode::<H::Payload>(&message.message_id, &message.body) {
            Ok(Decoded::Valid(payload)) => payload,
            Ok(Decoded::Skip) => {
                info!("Skipping infrastructure test event");
                self.acknowledge(message).await?;
                return Ok(Delivery::Skipped);
            }
            Err(e) => {
                let e = ProcessingError::from(e);
                error!(code = e.code(), receive_count = message.receive_count, "{e}");
                return Err(e);
            }
        };

        if let Err(e) = handler.handle(payload, context).await {
            error!(
                code = e.code(),
                permanent = e.is_permanent(),
                receive_count = message.receive_count,
                "Message processing failed: {e}"
            );
            return Err(e);
        }

        self.acknowledge(message).await?;
        Ok(Delivery::Handled)
    }

    async fn acknowledge(&self, message: &ReceivedMessage) -> Result<(), ProcessingError> {
        self.channel.delete(&self.config.queue, &message.receipt_handle).await.map_err(|e| {
            let e = ProcessingError::from(e);
            error!(code = e.code(), "Failed to delete processed message: {e}");
            e
        })
    }
}
