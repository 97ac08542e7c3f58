use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{CorrelationContext, MessageHandler, ProcessingError, RegistryEntry};
use tracing::info;

use crate::catalog::Catalog;

/// Upserts registry entries into the catalog.
pub struct RegistryUpdater {
    catalog: Arc<dyn Catalog>,
}

impl RegistryUpdater {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl MessageHandler for RegistryUpdater {
    type Payload = RegistryEntry;

    async fn handle(
        &self,
        payload: RegistryEntry,
        _context: &CorrelationContext,
    ) -> Result<(), ProcessingError> {
        let eservice_record_id = self.catalog.save_eservice(&payload).await?;
        info!(
            eservice_id = %payload.eservice_id,
            version_id = %payload.version_id,
            eservice_record_id,
            "EService saved"
        );
        Ok(())
    }
}
