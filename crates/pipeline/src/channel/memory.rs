use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use super::{
    ChannelError, ChannelSettings, DeadLetter, MessageAttributes, MessageChannel, OutgoingMessage,
    ReceiveOptions, ReceivedMessage,
};

#[derive(Debug)]
struct StoredMessage {
    message_id: String,
    body: Vec<u8>,
    group_key: Option<String>,
    attributes: MessageAttributes,
    receipt_handle: Option<String>,
    visible_at: Instant,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct State {
    // Per queue, in send order.
    queues: HashMap<String, Vec<StoredMessage>>,
    dead_letters: HashMap<String, Vec<DeadLetter>>,
}

/// In-process channel with the same lease semantics as the durable one.
///
/// Nothing survives the process; meant for tests and single-process runs.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    state: Mutex<State>,
    notify: Notify,
    settings: ChannelSettings,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: ChannelSettings) -> Self {
        Self { settings, ..Self::default() }
    }

    /// Messages still stored in `queue`, leased or not.
    pub async fn len(&self, queue: &str) -> usize {
        self.state.lock().await.queues.get(queue).map_or(0, Vec::len)
    }

    pub async fn is_empty(&self, queue: &str) -> bool {
        self.len(queue).await == 0
    }

    /// Bodies stored in `queue`, in send order.
    pub async fn bodies(&self, queue: &str) -> Vec<Vec<u8>> {
        let state = self.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|messages| messages.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Attributes stored in `queue`, in send order.
    pub async fn attributes(&self, queue: &str) -> Vec<MessageAttributes> {
        let state = self.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|messages| messages.iter().map(|m| m.attributes.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn dead_letters(&self, queue: &str) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.get(queue).cloned().unwrap_or_default()
    }

    async fn lease(&self, queue: &str, options: &ReceiveOptions) -> Vec<ReceivedMessage> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let State { queues, dead_letters } = &mut *state;

        let Some(messages) = queues.get_mut(queue) else {
            return Vec::new();
        };

        let mut leased = Vec::new();
        let mut seen_groups = HashSet::new();
        let mut index = 0;

        while index < messages.len() && leased.len() < options.max_messages {
            // Only the oldest message of a group is ever deliverable.
            let group_blocked = match &messages[index].group_key {
                Some(group) => !seen_groups.insert(group.clone()),
                None => false,
            };
            if group_blocked || messages[index].visible_at > now {
                index += 1;
                continue;
            }

            if let Some(max) = self.settings.max_receive_count {
                if messages[index].receive_count >= max {
                    let dead = messages.remove(index);
                    warn!(
                        queue,
                        message_id = %dead.message_id,
                        receive_count = dead.receive_count,
                        "Moving message to dead letters"
                    );
                    dead_letters.entry(queue.to_string()).or_default().push(DeadLetter {
                        message_id: dead.message_id,
                        queue: queue.to_string(),
                        body: dead.body,
                        attributes: dead.attributes,
                        receive_count: dead.receive_count,
                    });
                    continue;
                }
            }

            let message = &mut messages[index];
            let receipt_handle = Uuid::new_v4().to_string();
            message.receipt_handle = Some(receipt_handle.clone());
            message.visible_at = now + options.visibility_timeout;
            message.receive_count += 1;

            leased.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                body: message.body.clone(),
                receipt_handle,
                attributes: message.attributes.clone(),
                receive_count: message.receive_count,
            });
            index += 1;
        }

        leased
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn send(&self, queue: &str, message: OutgoingMessage) -> Result<String, ChannelError> {
        let message_id = Uuid::new_v4().to_string();
        {
            let mut state = self.state.lock().await;
            state.queues.entry(queue.to_string()).or_default().push(StoredMessage {
                message_id: message_id.clone(),
                body: message.body,
                group_key: message.group_key,
                attributes: message.attributes,
                receipt_handle: None,
                visible_at: Instant::now(),
                receive_count: 0,
            });
        }
        self.notify.notify_waiters();
        Ok(message_id)
    }

    async fn receive(
        &self,
        queue: &str,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, ChannelError> {
        options.check()?;
        let deadline = Instant::now() + options.wait;

        loop {
            let batch = self.lease(queue, options).await;
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }

            // Sends wake us early; lease expiry is only noticed on the next poll.
            let nap = (deadline - now).min(self.settings.poll_interval);
            let _ = tokio::time::timeout(nap, self.notify.notified()).await;
        }
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), ChannelError> {
        let mut state = self.state.lock().await;
        let messages = state.queues.get_mut(queue);

        let position = messages.as_ref().and_then(|messages| {
            messages.iter().position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
        });

        match (messages, position) {
            (Some(messages), Some(position)) => {
                messages.remove(position);
                Ok(())
            }
            _ => Err(ChannelError::UnknownReceipt {
                queue: queue.to_string(),
                receipt_handle: receipt_handle.to_string(),
            }),
        }
    }
}
