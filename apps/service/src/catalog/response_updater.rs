use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{CorrelationContext, MessageHandler, ProcessingError, ResponseReceivedUpdate};
use tracing::info;

use super::Catalog;

/// Writes the latest probe outcome back to the catalog.
pub struct ResponseUpdater {
    catalog: Arc<dyn Catalog>,
}

impl ResponseUpdater {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl MessageHandler for ResponseUpdater {
    type Payload = ResponseReceivedUpdate;

    async fn handle(
        &self,
        payload: ResponseReceivedUpdate,
        _context: &CorrelationContext,
    ) -> Result<(), ProcessingError> {
        self.catalog
            .update_response_received(
                payload.eservice_record_id,
                payload.status,
                payload.response_received,
            )
            .await?;

        info!(
            eservice_record_id = payload.eservice_record_id,
            status = %payload.status,
            "Response state updated"
        );
        Ok(())
    }
}
