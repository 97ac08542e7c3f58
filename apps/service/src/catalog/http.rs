use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline::{ProbeStatus, RegistryEntry};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{Catalog, CatalogError, DuePage};

/// Client for the catalog service's HTTP API.
pub struct CatalogClient {
    client: reqwest::Client,
    base_url: Url,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LastRequestBody {
    last_request: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponseReceivedBody {
    status: ProbeStatus,
    response_received: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedEService {
    eservice_record_id: i64,
}

impl CatalogClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Self::with_client(client, base_url)
    }

    /// Reuse an already configured client.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> anyhow::Result<Self> {
        // A trailing slash keeps any path prefix when joining endpoints.
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CatalogError> {
        self.base_url
            .join(path)
            .map_err(|e| CatalogError::InvalidData(format!("bad endpoint {path}: {e}")))
    }

    /// Map non-success statuses, treating 404 as a missing entity.
    async fn check(response: Response, entity: impl Into<String>) -> Result<Response, CatalogError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(entity.into()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(CatalogError::UnexpectedStatus { status: status.as_u16(), body })
    }
}

#[async_trait]
impl Catalog for CatalogClient {
    async fn services_due_for_polling(
        &self,
        offset: u64,
        limit: u32,
    ) -> Result<DuePage, CatalogError> {
        let url = self.endpoint("eservices/polling")?;
        debug!(%url, offset, limit, "Querying services due for polling");

        let response = self
            .client
            .get(url)
            .query(&[("offset", offset.to_string()), ("limit", limit.to_string())])
            .send()
            .await?;
        let response = Self::check(response, "polling page").await?;
        Ok(response.json::<DuePage>().await?)
    }

    async fn update_last_request(
        &self,
        eservice_record_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), CatalogError> {
        let url = self.endpoint(&format!("eservices/{eservice_record_id}/lastRequest"))?;
        let response =
            self.client.post(url).json(&LastRequestBody { last_request: at }).send().await?;
        Self::check(response, eservice_record_id.to_string()).await?;
        Ok(())
    }

    async fn update_response_received(
        &self,
        eservice_record_id: i64,
        status: ProbeStatus,
        at: DateTime<Utc>,
    ) -> Result<(), CatalogError> {
        let url = self.endpoint(&format!("eservices/{eservice_record_id}/responseReceived"))?;
        let response = self
            .client
            .post(url)
            .json(&ResponseReceivedBody { status, response_received: at })
            .send()
            .await?;
        Self::check(response, eservice_record_id.to_string()).await?;
        Ok(())
    }

    async fn save_eservice(&self, entry: &RegistryEntry) -> Result<i64, CatalogError> {
        let url = self.endpoint(&format!(
            "eservices/{}/versions/{}",
            entry.eservice_id, entry.version_id
        ))?;
        let response = self.client.put(url).json(entry).send().await?;
        let response = Self::check(response, format!("{}/{}", entry.eservice_id, entry.version_id)).await?;
        Ok(response.json::<SavedEService>().await?.eservice_record_id)
    }
}
