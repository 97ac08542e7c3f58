//! eService catalog boundary.
//!
//! The catalog owns the relational "last known state" of every eService. The
//! pipeline only talks to it through the [`Catalog`] trait, either over the
//! catalog service's HTTP API or against an embedded database.

pub mod http;
pub mod response_updater;

pub use http::CatalogClient;
pub use response_updater::ResponseUpdater;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline::{ProbeRequest, ProbeStatus, ProcessingError, RegistryEntry, Technology};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A service whose next probe is due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueEService {
    pub eservice_record_id: i64,
    pub technology: Technology,
    pub base_path: Vec<String>,
    pub audience: Vec<String>,
}

impl DueEService {
    pub fn probe_request(&self) -> ProbeRequest {
        ProbeRequest {
            eservice_record_id: self.eservice_record_id,
            technology: self.technology,
            base_path: self.base_path.clone(),
            audience: self.audience.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuePage {
    pub content: Vec<DueEService>,
    pub total_count: u64,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("eservice {0} not found")]
    NotFound(String),
    #[error("catalog request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("catalog responded with status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("catalog database error: {0}")]
    Database(#[from] libsql::Error),
    #[error("catalog pool error: {0}")]
    Pool(String),
    #[error("invalid catalog data: {0}")]
    InvalidData(String),
}

impl From<CatalogError> for ProcessingError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::NotFound(id) => ProcessingError::NotFound { entity: "eservice", id },
            other => ProcessingError::downstream("catalog", other),
        }
    }
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// One page of services whose `lastRequest + pollingFrequency` has passed.
    async fn services_due_for_polling(&self, offset: u64, limit: u32)
    -> Result<DuePage, CatalogError>;

    async fn update_last_request(
        &self,
        eservice_record_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), CatalogError>;

    /// Overwrite the last known status. Most recent write wins.
    async fn update_response_received(
        &self,
        eservice_record_id: i64,
        status: ProbeStatus,
        at: DateTime<Utc>,
    ) -> Result<(), CatalogError>;

    /// Idempotent upsert keyed by `(eserviceId, versionId)`; returns the record id.
    async fn save_eservice(&self, entry: &RegistryEntry) -> Result<i64, CatalogError>;
}
