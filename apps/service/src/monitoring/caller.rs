use async_trait::async_trait;
use chrono::Utc;
use pipeline::{CorrelationContext, MessageHandler, ProbeRequest, ProcessingError, Publisher};
use tracing::info;

use super::executor::ProbeExecutor;

/// Probes one service per message and fans the outcome out to the
/// telemetry and response-received queues.
///
/// Both sends must succeed before the request is acknowledged. When the
/// second one fails the request is redelivered and probed again, which can
/// leave a duplicate telemetry point behind.
pub struct Caller {
    executor: ProbeExecutor,
    telemetry: Publisher,
    responses: Publisher,
}

impl Caller {
    pub fn new(executor: ProbeExecutor, telemetry: Publisher, responses: Publisher) -> Self {
        Self { executor, telemetry, responses }
    }
}

#[async_trait]
impl MessageHandler for Caller {
    type Payload = ProbeRequest;

    async fn handle(
        &self,
        payload: ProbeRequest,
        context: &CorrelationContext,
    ) -> Result<(), ProcessingError> {
        let report = self.executor.probe(&payload, context).await;
        info!(
            eservice_record_id = report.eservice_record_id,
            technology = %payload.technology,
            outcome = ?report.outcome,
            "Probe completed"
        );

        self.telemetry.publish(&report.telemetry_result(), context, None).await?;
        self.responses.publish(&report.response_update(Utc::now()), context, None).await?;
        Ok(())
    }
}
