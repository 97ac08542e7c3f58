use chrono::{DateTime, Utc};
use pipeline::{EServiceState, ProbeStatus, Technology};
use uuid::Uuid;

use crate::catalog::CatalogError;

/// Full catalog row, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EServiceRecord {
    pub eservice_record_id: i64,
    pub eservice_id: Uuid,
    pub version_id: Uuid,
    pub producer_id: Uuid,
    pub name: String,
    pub producer_name: String,
    pub base_path: Vec<String>,
    pub technology: Technology,
    pub state: EServiceState,
    pub audience: Vec<String>,
    pub version_number: i64,
    pub probing_enabled: bool,
    pub polling_frequency: i64,
    pub last_request: Option<DateTime<Utc>>,
    pub response_status: Option<ProbeStatus>,
    pub response_received: Option<DateTime<Utc>>,
}

pub fn parse_technology(value: &str) -> Result<Technology, CatalogError> {
    match value {
        "REST" => Ok(Technology::Rest),
        "SOAP" => Ok(Technology::Soap),
        other => Err(CatalogError::InvalidData(format!("unknown technology {other:?}"))),
    }
}

pub fn parse_state(value: &str) -> Result<EServiceState, CatalogError> {
    match value {
        "ACTIVE" => Ok(EServiceState::Active),
        "INACTIVE" => Ok(EServiceState::Inactive),
        other => Err(CatalogError::InvalidData(format!("unknown state {other:?}"))),
    }
}

pub fn parse_status(value: &str) -> Result<ProbeStatus, CatalogError> {
    ProbeStatus::parse(value)
        .ok_or_else(|| CatalogError::InvalidData(format!("unknown status {value:?}")))
}

/// Decode a JSON array column.
pub fn parse_string_list(value: &str) -> Result<Vec<String>, CatalogError> {
    serde_json::from_str(value)
        .map_err(|e| CatalogError::InvalidData(format!("bad string list {value:?}: {e}")))
}

pub fn encode_string_list(values: &[String]) -> Result<String, CatalogError> {
    serde_json::to_string(values).map_err(|e| CatalogError::InvalidData(e.to_string()))
}

pub fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, CatalogError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| CatalogError::InvalidData(format!("timestamp {millis} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_columns_parse() {
        assert_eq!(parse_technology("SOAP").unwrap(), Technology::Soap);
        assert_eq!(parse_state("INACTIVE").unwrap(), EServiceState::Inactive);
        assert_eq!(parse_status("KO").unwrap(), ProbeStatus::Ko);
        assert!(parse_technology("GRPC").is_err());
    }

    #[test]
    fn test_string_list_columns() {
        let encoded = encode_string_list(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(encoded, r#"["a","b"]"#);
        assert!(parse_string_list("not json").is_err());
    }
}
