use std::fmt;

use chrono::{DateTime, Utc};
use pipeline::messages::format_check_time;
use pipeline::{ProbeStatus, ResponseReceivedUpdate, TelemetryResult};

/// Why a probe did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KoReason {
    ConnectionRefused,
    ConnectionTimeout,
    /// The service answered with a non-2xx status.
    HttpStatus(u16),
    Unknown,
}

impl fmt::Display for KoReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KoReason::ConnectionRefused => write!(f, "Connection refused"),
            KoReason::ConnectionTimeout => write!(f, "Connection timeout"),
            KoReason::HttpStatus(status) => write!(f, "{status}"),
            KoReason::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ok { response_time: u64 },
    Ko { reason: KoReason, response_time: Option<u64> },
}

impl ProbeOutcome {
    pub fn status(&self) -> ProbeStatus {
        match self {
            ProbeOutcome::Ok { .. } => ProbeStatus::Ok,
            ProbeOutcome::Ko { .. } => ProbeStatus::Ko,
        }
    }
}

/// Classified result of probing one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub eservice_record_id: i64,
    /// Stamped when the probe started.
    pub checked_at: DateTime<Utc>,
    pub outcome: ProbeOutcome,
}

impl ProbeReport {
    pub fn telemetry_result(&self) -> TelemetryResult {
        let check_time = format_check_time(self.checked_at);
        match self.outcome {
            ProbeOutcome::Ok { response_time } => TelemetryResult::Ok {
                eservice_record_id: self.eservice_record_id,
                check_time,
                response_time,
            },
            ProbeOutcome::Ko { reason, response_time } => TelemetryResult::Ko {
                eservice_record_id: self.eservice_record_id,
                check_time,
                response_time,
                ko_reason: reason.to_string(),
            },
        }
    }

    pub fn response_update(&self, response_received: DateTime<Utc>) -> ResponseReceivedUpdate {
        ResponseReceivedUpdate {
            eservice_record_id: self.eservice_record_id,
            status: self.outcome.status(),
            response_received,
        }
    }
}
