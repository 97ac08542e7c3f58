use std::sync::Arc;

use chrono::Utc;
use pipeline::{CorrelationContext, ProcessingError, Publisher};
use tracing::{Instrument, error, info, warn};

use crate::catalog::{Catalog, DueEService};

/// What one scheduler tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub due: usize,
    pub enqueued: usize,
    pub failed: usize,
}

/// Scheduler - turns due catalog entries into probe requests
pub struct Scheduler {
    catalog: Arc<dyn Catalog>,
    publisher: Publisher,
    page_size: u32,
    service_name: String,
}

impl Scheduler {
    pub fn new(catalog: Arc<dyn Catalog>, publisher: Publisher, page_size: u32) -> Self {
        Self { catalog, publisher, page_size: page_size.max(1), service_name: "scheduler".to_string() }
    }

    /// Run one tick. A catalog failure while listing aborts before anything
    /// is sent; a failure for a single service is counted and skipped.
    pub async fn produce_batch(&self) -> Result<BatchSummary, ProcessingError> {
        let due = self.collect_due().await?;
        let mut summary = BatchSummary { due: due.len(), ..BatchSummary::default() };

        for service in &due {
            let context = CorrelationContext::new(&self.service_name);
            let span = context.span();
            match self.enqueue(service, &context).instrument(span).await {
                Ok(()) => summary.enqueued += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        eservice_record_id = service.eservice_record_id,
                        correlation_id = %context.correlation_id,
                        code = e.code(),
                        "Failed to schedule probe: {e}"
                    );
                }
            }
        }

        if summary.failed > 0 {
            warn!(due = summary.due, failed = summary.failed, "Scheduler tick finished with failures");
        } else {
            info!(due = summary.due, enqueued = summary.enqueued, "Scheduler tick finished");
        }
        Ok(summary)
    }

    /// Every page is read up front so stamping `lastRequest` cannot shift the
    /// offsets of later pages.
    async fn collect_due(&self) -> Result<Vec<DueEService>, ProcessingError> {
        let mut due = Vec::new();
        let mut offset = 0u64;

        loop {
            let page = self.catalog.services_due_for_polling(offset, self.page_size).await?;
            let fetched = page.content.len() as u64;
            due.extend(page.content);
            offset += fetched;

            if fetched < u64::from(self.page_size) || offset >= page.total_count {
                break;
            }
        }

        Ok(due)
    }

    async fn enqueue(
        &self,
        service: &DueEService,
        context: &CorrelationContext,
    ) -> Result<(), ProcessingError> {
        self.publisher.publish(&service.probe_request(), context, None).await?;
        self.catalog.update_last_request(service.eservice_record_id, Utc::now()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::DateTime;
    use pipeline::{
        ChannelError, MemoryChannel, MessageChannel, OutgoingMessage, ProbeStatus, ReceiveOptions,
        ReceivedMessage, RegistryEntry,
    };
    use tokio::sync::Mutex;

    use super::*;
    use crate::catalog::{CatalogError, DuePage};
    use crate::database::repository::tests::{create_test_database, registry_entry};

    #[tokio::test]
    async fn test_due_services_become_probe_requests() {
        let (db, _dir) = create_test_database().await;
        let db = Arc::new(db);
        db.save_eservice(&registry_entry("a")).await.unwrap();
        db.save_eservice(&registry_entry("b")).await.unwrap();

        let channel = Arc::new(MemoryChannel::new());
        let scheduler = Scheduler::new(db.clone(), Publisher::new(channel.clone(), "poll"), 1);

        let summary = scheduler.produce_batch().await.unwrap();
        assert_eq!(summary, BatchSummary { due: 2, enqueued: 2, failed: 0 });
        assert_eq!(channel.len("poll").await, 2);

        // Each request starts its own chain.
        let attributes = channel.attributes("poll").await;
        assert_ne!(attributes[0], attributes[1]);

        // Stamped, so nothing is due on the next tick.
        let summary = scheduler.produce_batch().await.unwrap();
        assert_eq!(summary.due, 0);
        assert_eq!(channel.len("poll").await, 2);
    }

    /// Fails every send after the first `allowed`.
    struct FlakyChannel {
        inner: MemoryChannel,
        allowed: Mutex<usize>,
    }

    #[async_trait]
    impl MessageChannel for FlakyChannel {
        async fn send(&self, queue: &str, message: OutgoingMessage) -> Result<String, ChannelError> {
            let mut allowed = self.allowed.lock().await;
            if *allowed == 0 {
                return Err(ChannelError::Pool("throttled".to_string()));
            }
            *allowed -= 1;
            self.inner.send(queue, message).await
        }

        async fn receive(
            &self,
            queue: &str,
            options: &ReceiveOptions,
        ) -> Result<Vec<ReceivedMessage>, ChannelError> {
            self.inner.receive(queue, options).await
        }

        async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), ChannelError> {
            self.inner.delete(queue, receipt_handle).await
        }
    }

    #[tokio::test]
    async fn test_failed_send_does_not_abort_batch() {
        let (db, _dir) = create_test_database().await;
        let db = Arc::new(db);
        for name in ["a", "b", "c"] {
            db.save_eservice(&registry_entry(name)).await.unwrap();
        }

        let channel = Arc::new(FlakyChannel { inner: MemoryChannel::new(), allowed: Mutex::new(2) });
        let scheduler = Scheduler::new(db.clone(), Publisher::new(channel.clone(), "poll"), 10);

        let summary = scheduler.produce_batch().await.unwrap();
        assert_eq!(summary, BatchSummary { due: 3, enqueued: 2, failed: 1 });
        assert_eq!(channel.inner.len("poll").await, 2);

        // The unsent one was not stamped and stays due.
        assert_eq!(db.services_due_for_polling(0, 10).await.unwrap().total_count, 1);
    }

    struct UnreachableCatalog;

    #[async_trait]
    impl Catalog for UnreachableCatalog {
        async fn services_due_for_polling(&self, _: u64, _: u32) -> Result<DuePage, CatalogError> {
            Err(CatalogError::UnexpectedStatus { status: 503, body: "down".to_string() })
        }

        async fn update_last_request(&self, _: i64, _: DateTime<Utc>) -> Result<(), CatalogError> {
            unreachable!()
        }

        async fn update_response_received(
            &self,
            _: i64,
            _: ProbeStatus,
            _: DateTime<Utc>,
        ) -> Result<(), CatalogError> {
            unreachable!()
        }

        async fn save_eservice(&self, _: &RegistryEntry) -> Result<i64, CatalogError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_catalog_failure_aborts_tick() {
        let channel = Arc::new(MemoryChannel::new());
        let scheduler =
            Scheduler::new(Arc::new(UnreachableCatalog), Publisher::new(channel.clone(), "poll"), 10);

        let err = scheduler.produce_batch().await.unwrap_err();
        assert_eq!(err.code(), "DOWNSTREAM_CALL_ERROR");
        assert!(channel.is_empty("poll").await);
    }
}
