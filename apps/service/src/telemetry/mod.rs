//! Time-series telemetry: one point per probe, never updated.

pub mod writer;

pub use writer::TelemetryWriter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline::{ProbeStatus, TelemetryResult};
use thiserror::Error;

/// Measurement every probe point is written to.
pub const MEASUREMENT: &str = "eservices";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryPoint {
    pub measurement: String,
    /// Dimension.
    pub eservice_record_id: i64,
    /// When the probe was observed, not when the point is written.
    pub time: DateTime<Utc>,
    pub status: ProbeStatus,
    pub response_time: Option<u64>,
    /// Empty for successful probes.
    pub ko_reason: String,
}

impl TelemetryPoint {
    /// `None` when `checkTime` is not a valid timestamp.
    pub fn from_result(result: &TelemetryResult) -> Option<Self> {
        let time = result.checked_at()?;
        let (response_time, ko_reason) = match result {
            TelemetryResult::Ok { response_time, .. } => (Some(*response_time), String::new()),
            TelemetryResult::Ko { response_time, ko_reason, .. } => (*response_time, ko_reason.clone()),
        };

        Some(Self {
            measurement: MEASUREMENT.to_string(),
            eservice_record_id: result.eservice_record_id(),
            time,
            status: result.status(),
            response_time,
            ko_reason,
        })
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry database error: {0}")]
    Database(#[from] libsql::Error),
    #[error("telemetry pool error: {0}")]
    Pool(String),
}

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Append one point. Writing the same observation twice stores it twice.
    async fn write_point(&self, point: &TelemetryPoint) -> Result<(), TelemetryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_point_has_empty_reason() {
        let point = TelemetryPoint::from_result(&TelemetryResult::Ok {
            eservice_record_id: 42,
            check_time: "1700000000000".to_string(),
            response_time: 80,
        })
        .unwrap();

        assert_eq!(point.measurement, "eservices");
        assert_eq!(point.eservice_record_id, 42);
        assert_eq!(point.status, ProbeStatus::Ok);
        assert_eq!(point.response_time, Some(80));
        assert_eq!(point.ko_reason, "");
        assert_eq!(point.time.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_ko_point_without_response_time() {
        let point = TelemetryPoint::from_result(&TelemetryResult::Ko {
            eservice_record_id: 7,
            check_time: "1700000000000".to_string(),
            response_time: None,
            ko_reason: "Connection refused".to_string(),
        })
        .unwrap();

        assert_eq!(point.status, ProbeStatus::Ko);
        assert_eq!(point.response_time, None);
        assert_eq!(point.ko_reason, "Connection refused");
    }

    #[test]
    fn test_invalid_check_time_has_no_point() {
        let result = TelemetryResult::Ok {
            eservice_record_id: 1,
            check_time: "yesterday".to_string(),
            response_time: 1,
        };
        assert!(TelemetryPoint::from_result(&result).is_none());
    }
}
