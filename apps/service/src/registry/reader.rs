use std::sync::Arc;

use pipeline::{
    CorrelationContext, Decoded, ProcessingError, Publisher, RegistryEntry, Validate, decode,
};
use serde::Deserialize;
use tracing::{Instrument, error, info};

use crate::storage::{ObjectStore, StorageError};

/// The whole registry object. Valid only if every entry is.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct RegistrySnapshot(Vec<RegistryEntry>);

impl Validate for RegistrySnapshot {
    fn validate(&self) -> Result<(), String> {
        for (index, entry) in self.0.iter().enumerate() {
            entry.validate().map_err(|e| format!("entry {index}: {e}"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSummary {
    pub entries: usize,
    pub enqueued: usize,
    pub failed: usize,
}

pub struct RegistryReader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    publisher: Publisher,
}

impl RegistryReader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        publisher: Publisher,
    ) -> Self {
        Self { store, bucket: bucket.into(), key: key.into(), publisher }
    }

    /// Fetch the snapshot and enqueue one message per entry.
    ///
    /// Nothing is sent unless the whole object parses and validates.
    pub async fn run(&self) -> Result<ReadSummary, ProcessingError> {
        let object_id = format!("{}/{}", self.bucket, self.key);
        let body = self.store.get_object(&self.bucket, &self.key).await.map_err(|e| match e {
            StorageError::NotFound { .. } => ProcessingError::NotFound { entity: "object", id: object_id.clone() },
            other => ProcessingError::downstream("object store", other),
        })?;

        let entries = match decode::<RegistrySnapshot>(&object_id, &body)? {
            Decoded::Valid(RegistrySnapshot(entries)) => entries,
            Decoded::Skip => {
                info!(object = %object_id, "Registry object is a test event, nothing to read");
                return Ok(ReadSummary::default());
            }
        };

        let mut summary = ReadSummary { entries: entries.len(), ..ReadSummary::default() };
        for entry in &entries {
            let context = CorrelationContext::new("registry-reader");
            let group_key = Some(entry.eservice_id.to_string());
            let sent = self.publisher.publish(entry, &context, group_key).instrument(context.span()).await;

            match sent {
                Ok(_) => summary.enqueued += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        eservice_id = %entry.eservice_id,
                        correlation_id = %context.correlation_id,
                        code = e.code(),
                        "Failed to enqueue registry entry: {e}"
                    );
                }
            }
        }

        info!(
            object = %object_id,
            entries = summary.entries,
            enqueued = summary.enqueued,
            failed = summary.failed,
            "Registry read finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use pipeline::{MemoryChannel, MessageChannel, ReceiveOptions};

    use super::*;
    use crate::database::repository::tests::registry_entry;
    use crate::storage::FsObjectStore;

    fn write_snapshot(root: &Path, body: &[u8]) {
        std::fs::create_dir_all(root.join("registry")).unwrap();
        std::fs::write(root.join("registry/eservices.json"), body).unwrap();
    }

    fn reader(root: &Path, channel: Arc<MemoryChannel>) -> RegistryReader {
        RegistryReader::new(
            Arc::new(FsObjectStore::new(root)),
            "registry",
            "eservices.json",
            Publisher::new(channel, "registry"),
        )
    }

    #[tokio::test]
    async fn test_each_entry_is_enqueued() {
        let dir = tempfile::tempdir().unwrap();
        let first = registry_entry("a");
        let second_version = RegistryEntry { version_id: uuid::Uuid::new_v4(), ..first.clone() };
        let other = registry_entry("b");
        write_snapshot(dir.path(), &serde_json::to_vec(&[&first, &second_version, &other]).unwrap());

        let channel = Arc::new(MemoryChannel::new());
        let summary = reader(dir.path(), channel.clone()).run().await.unwrap();
        assert_eq!(summary, ReadSummary { entries: 3, enqueued: 3, failed: 0 });

        // Two versions of one eService share a group, so only the older is deliverable.
        let options = ReceiveOptions { max_messages: 10, ..ReceiveOptions::default() };
        let leased = channel.receive("registry", &options).await.unwrap();
        assert_eq!(leased.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_entry_aborts_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let mut broken = registry_entry("b");
        broken.base_path.clear();
        write_snapshot(
            dir.path(),
            &serde_json::to_vec(&[registry_entry("a"), broken]).unwrap(),
        );

        let channel = Arc::new(MemoryChannel::new());
        let err = reader(dir.path(), channel.clone()).run().await.unwrap_err();
        assert_eq!(err.code(), "DECODE_ERROR");
        assert!(channel.is_empty("registry").await);
    }

    #[tokio::test]
    async fn test_malformed_object_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), b"{not json");

        let channel = Arc::new(MemoryChannel::new());
        match reader(dir.path(), channel).run().await.unwrap_err() {
            ProcessingError::Decode(e) => assert_eq!(e.message_id, "registry/eservices.json"),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let channel = Arc::new(MemoryChannel::new());
        let err = reader(dir.path(), channel).run().await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
