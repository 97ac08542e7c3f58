use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, TransactionBehavior, params};
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    ChannelError, ChannelSettings, DeadLetter, MessageAttributes, MessageChannel, OutgoingMessage,
    ReceiveOptions, ReceivedMessage,
};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Durable channel backed by a libsql database.
///
/// Leasing happens inside an immediate transaction, so any number of stage
/// processes can share the same database file.
pub struct LibsqlChannel {
    pool: LibsqlPool,
    settings: ChannelSettings,
}

struct Candidate {
    id: i64,
    message_id: String,
    body: Vec<u8>,
    attributes: String,
    receive_count: u32,
}

impl LibsqlChannel {
    pub fn new(pool: LibsqlPool, settings: ChannelSettings) -> Self {
        Self { pool, settings }
    }

    /// Create the channel tables if they are missing.
    pub async fn initialize(&self) -> Result<(), ChannelError> {
        let conn = self.get_conn().await?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS channel_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL UNIQUE,
                queue TEXT NOT NULL,
                body BLOB NOT NULL,
                group_key TEXT,
                attributes TEXT NOT NULL,
                receipt_handle TEXT,
                visible_at INTEGER NOT NULL,
                receive_count INTEGER NOT NULL DEFAULT 0,
                sent_at INTEGER NOT NULL
            )",
            (),
        )
        .await?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_channel_messages_queue ON channel_messages(queue, visible_at)",
            (),
        )
        .await?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS channel_dead_letters (
                message_id TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                body BLOB NOT NULL,
                attributes TEXT NOT NULL,
                receive_count INTEGER NOT NULL,
                dead_lettered_at INTEGER NOT NULL
            )",
            (),
        )
        .await?;
        Ok(())
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, ChannelError> {
        self.pool.get().await.map_err(|e| ChannelError::Pool(e.to_string()))
    }

    /// Messages still stored in `queue`, leased or not.
    pub async fn len(&self, queue: &str) -> Result<usize, ChannelError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM channel_messages WHERE queue = ?", params![queue])
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(count as usize)
    }

    pub async fn dead_letters(&self, queue: &str) -> Result<Vec<DeadLetter>, ChannelError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT message_id, body, attributes, receive_count FROM channel_dead_letters WHERE queue = ? ORDER BY dead_lettered_at",
                params![queue],
            )
            .await?;

        let mut dead = Vec::new();
        while let Some(row) = rows.next().await? {
            let attributes: String = row.get(2)?;
            dead.push(DeadLetter {
                message_id: row.get(0)?,
                queue: queue.to_string(),
                body: row.get(1)?,
                attributes: serde_json::from_str(&attributes)?,
                receive_count: row.get::<i64>(3)? as u32,
            });
        }
        Ok(dead)
    }

    async fn lease(
        &self,
        queue: &str,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, ChannelError> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;
        let now = Utc::now().timestamp_millis();

        let candidates = select_candidates(&tx, queue, now, options.max_messages).await?;
        let mut leased = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            if let Some(max) = self.settings.max_receive_count {
                if candidate.receive_count >= max {
                    warn!(
                        queue,
                        message_id = %candidate.message_id,
                        receive_count = candidate.receive_count,
                        "Moving message to dead letters"
                    );
                    tx.execute(
                        "INSERT INTO channel_dead_letters (message_id, queue, body, attributes, receive_count, dead_lettered_at)
                         SELECT message_id, queue, body, attributes, receive_count, ? FROM channel_messages WHERE id = ?",
                        params![now, candidate.id],
                    )
                    .await?;
                    tx.execute("DELETE FROM channel_messages WHERE id = ?", params![candidate.id])
                        .await?;
                    continue;
                }
            }

            let receipt_handle = Uuid::new_v4().to_string();
            let visible_at = now + options.visibility_timeout.as_millis() as i64;
            tx.execute(
                "UPDATE channel_messages SET receipt_handle = ?, visible_at = ?, receive_count = receive_count + 1 WHERE id = ?",
                params![receipt_handle.clone(), visible_at, candidate.id],
            )
            .await?;

            leased.push(ReceivedMessage {
                message_id: candidate.message_id,
                body: candidate.body,
                receipt_handle,
                attributes: serde_json::from_str::<MessageAttributes>(&candidate.attributes)?,
                receive_count: candidate.receive_count + 1,
            });
        }

        tx.commit().await?;
        Ok(leased)
    }
}

/// Visible messages, oldest first, skipping any message that still has an
/// older sibling in its group.
async fn select_candidates(
    conn: &Connection,
    queue: &str,
    now: i64,
    limit: usize,
) -> Result<Vec<Candidate>, ChannelError> {
    let mut rows = conn
        .query(
            "SELECT m.id, m.message_id, m.body, m.attributes, m.receive_count
             FROM channel_messages m
             WHERE m.queue = ?1
               AND m.visible_at <= ?2
               AND (m.group_key IS NULL OR NOT EXISTS (
                   SELECT 1 FROM channel_messages o
                   WHERE o.queue = m.queue AND o.group_key = m.group_key AND o.id < m.id))
             ORDER BY m.id
             LIMIT ?3",
            params![queue, now, limit as i64],
        )
        .await?;

    let mut candidates = Vec::new();
    while let Some(row) = rows.next().await? {
        candidates.push(Candidate {
            id: row.get(0)?,
            message_id: row.get(1)?,
            body: row.get(2)?,
            attributes: row.get(3)?,
            receive_count: row.get::<i64>(4)? as u32,
        });
    }
    Ok(candidates)
}

#[async_trait]
impl MessageChannel for LibsqlChannel {
    async fn send(&self, queue: &str, message: OutgoingMessage) -> Result<String, ChannelError> {
        let conn = self.get_conn().await?;
        let message_id = Uuid::new_v4().to_string();
        let attributes = serde_json::to_string(&message.attributes)?;
        let now = Utc::now().timestamp_millis();

        conn.execute(
            "INSERT INTO channel_messages (message_id, queue, body, group_key, attributes, visible_at, receive_count, sent_at) VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
            params![
                message_id.clone(),
                queue,
                message.body,
                message.group_key,
                attributes,
                now,
                now
            ],
        )
        .await?;

        debug!(queue, %message_id, "Message sent");
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
            let batch = self.lease(queue, options).await?;
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            sleep((deadline - now).min(self.settings.poll_interval)).await;
        }
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), ChannelError> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM channel_messages WHERE queue = ? AND receipt_handle = ?",
                params![queue, receipt_handle],
            )
            .await?;

        if deleted == 0 {
            return Err(ChannelError::UnknownReceipt {
                queue: queue.to_string(),
                receipt_handle: receipt_handle.to_string(),
            });
        }
        Ok(())
    }
}
