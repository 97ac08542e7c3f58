use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{
    CorrelationContext, DecodeError, DecodeErrorKind, MessageHandler, ProcessingError,
    TelemetryResult,
};
use tracing::info;

use super::{TelemetryPoint, TelemetryStore};

/// Turns telemetry messages into time-series points.
pub struct TelemetryWriter {
    store: Arc<dyn TelemetryStore>,
}

impl TelemetryWriter {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageHandler for TelemetryWriter {
    type Payload = TelemetryResult;

    async fn handle(
        &self,
        payload: TelemetryResult,
        context: &CorrelationContext,
    ) -> Result<(), ProcessingError> {
        // Validation already rejects a bad checkTime; this covers direct callers.
        let Some(point) = TelemetryPoint::from_result(&payload) else {
            return Err(DecodeError {
                message_id: context.message_id.clone().unwrap_or_default(),
                kind: DecodeErrorKind::Validation,
                detail: format!("invalid checkTime {:?}", payload.check_time()),
            }
            .into());
        };

        self.store
            .write_point(&point)
            .await
            .map_err(|e| ProcessingError::downstream("telemetry store", e))?;

        info!(
            eservice_record_id = point.eservice_record_id,
            status = %point.status,
            "Telemetry point written"
        );
        Ok(())
    }
}
