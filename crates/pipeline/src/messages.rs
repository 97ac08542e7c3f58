//! Payloads carried on the pipeline queues.
//!
//! Every payload has exactly one wire schema. Field names follow the camelCase
//! JSON used on the queues; the correlation id never appears in a body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::Validate;

/// Upper bound for `koReason`, in characters.
pub const KO_REASON_MAX_LEN: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Technology {
    Rest,
    Soap,
}

impl std::fmt::Display for Technology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Technology::Rest => write!(f, "REST"),
            Technology::Soap => write!(f, "SOAP"),
        }
    }
}

/// Outcome of a probe as seen by the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeStatus {
    Ok,
    Ko,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Ok => "OK",
            ProbeStatus::Ko => "KO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OK" => Some(ProbeStatus::Ok),
            "KO" => Some(ProbeStatus::Ko),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Poll queue body: one service to probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRequest {
    pub eservice_record_id: i64,
    pub technology: Technology,
    pub base_path: Vec<String>,
    pub audience: Vec<String>,
}

/// An empty `basePath` is schema-valid; the caller reports it as KO.
impl Validate for ProbeRequest {}

/// Telemetry queue body: an append-only fact about one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum TelemetryResult {
    #[serde(rename = "OK", rename_all = "camelCase")]
    Ok { eservice_record_id: i64, check_time: String, response_time: u64 },

    #[serde(rename = "KO", rename_all = "camelCase")]
    Ko {
        eservice_record_id: i64,
        check_time: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_time: Option<u64>,
        ko_reason: String,
    },
}

impl TelemetryResult {
    pub fn eservice_record_id(&self) -> i64 {
        match self {
            Self::Ok { eservice_record_id, .. } | Self::Ko { eservice_record_id, .. } => {
                *eservice_record_id
            }
        }
    }

    pub fn status(&self) -> ProbeStatus {
        match self {
            Self::Ok { .. } => ProbeStatus::Ok,
            Self::Ko { .. } => ProbeStatus::Ko,
        }
    }

    pub fn check_time(&self) -> &str {
        match self {
            Self::Ok { check_time, .. } | Self::Ko { check_time, .. } => check_time,
        }
    }

    /// `checkTime` as an instant, if it is a valid epoch-millisecond string.
    pub fn checked_at(&self) -> Option<DateTime<Utc>> {
        parse_check_time(self.check_time())
    }
}

/// Render an instant the way `checkTime` is carried on the wire.
pub fn format_check_time(at: DateTime<Utc>) -> String {
    at.timestamp_millis().to_string()
}

fn parse_check_time(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)
}

impl Validate for TelemetryResult {
    fn validate(&self) -> Result<(), String> {
        if self.checked_at().is_none() {
            return Err(format!(
                "checkTime must be epoch milliseconds, got {:?}",
                self.check_time()
            ));
        }

        if let Self::Ko { ko_reason, .. } = self {
            let len = ko_reason.chars().count();
            if len == 0 || len > KO_REASON_MAX_LEN {
                return Err(format!(
                    "koReason must be 1..={KO_REASON_MAX_LEN} characters, got {len}"
                ));
            }
        }

        Ok(())
    }
}

/// Response-received queue body: the latest known state of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceivedUpdate {
    pub eservice_record_id: i64,
    pub status: ProbeStatus,
    pub response_received: DateTime<Utc>,
}

impl Validate for ResponseReceivedUpdate {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EServiceState {
    Active,
    Inactive,
}

impl EServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EServiceState::Active => "ACTIVE",
            EServiceState::Inactive => "INACTIVE",
        }
    }
}

/// Registry queue body: one catalog entry to upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub eservice_id: Uuid,
    pub version_id: Uuid,
    pub producer_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub producer_name: String,
    pub base_path: Vec<String>,
    pub technology: Technology,
    pub state: EServiceState,
    pub audience: Vec<String>,
    #[serde(default)]
    pub version_number: i64,
}

impl Validate for RegistryEntry {
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err(format!("eservice {} has an empty name", self.eservice_id));
        }
        if self.base_path.is_empty() {
            return Err(format!("eservice {} has no basePath", self.eservice_id));
        }
        Ok(())
    }
}
