use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use libsql::params;
use pipeline::pool::{LibsqlManager, LibsqlPool, open_pool};
use pipeline::{ProbeStatus, RegistryEntry};
use uuid::Uuid;

use super::initialize_database;
use super::models::{
    EServiceRecord, encode_string_list, millis_to_datetime, parse_state, parse_status,
    parse_string_list, parse_technology,
};
use crate::catalog::{Catalog, CatalogError, DueEService, DuePage};
use crate::telemetry::{TelemetryError, TelemetryPoint, TelemetryStore};

/// Rows that are active, enabled, inside their polling window and whose
/// frequency has elapsed since the last request.
const DUE_FILTER: &str = "state = 'ACTIVE'
    AND probing_enabled = 1
    AND ?1 BETWEEN polling_start_time AND polling_end_time
    AND (last_request IS NULL OR last_request + polling_frequency * 60000 <= ?2)";

/// LibSQL implementation of the catalog and the telemetry store
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Open a local database file and bring its schema up to date
    pub async fn open(path: &str) -> Result<Self> {
        let pool = open_pool(path).await?;
        let conn = pool.get().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        initialize_database(&conn).await?;
        drop(conn);
        Ok(Self::new_from_pool(pool))
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, String> {
        self.pool.get().await.map_err(|e| e.to_string())
    }

    /// Look up one catalog row
    pub async fn get_eservice(
        &self,
        eservice_record_id: i64,
    ) -> Result<Option<EServiceRecord>, CatalogError> {
        let conn = self.get_conn().await.map_err(CatalogError::Pool)?;
        let mut rows = conn
            .query(
                "SELECT eservice_record_id, eservice_id, version_id, producer_id, name, producer_name, base_path, technology, state, audience, version_number, probing_enabled, polling_frequency, last_request, response_status, response_received FROM eservices WHERE eservice_record_id = ?",
                params![eservice_record_id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let uuid = |index: i32| -> Result<Uuid, CatalogError> {
            let raw: String = row.get(index)?;
            Uuid::parse_str(&raw).map_err(|e| CatalogError::InvalidData(format!("{raw}: {e}")))
        };

        Ok(Some(EServiceRecord {
            eservice_record_id: row.get(0)?,
            eservice_id: uuid(1)?,
            version_id: uuid(2)?,
            producer_id: uuid(3)?,
            name: row.get(4)?,
            producer_name: row.get(5)?,
            base_path: parse_string_list(&row.get::<String>(6)?)?,
            technology: parse_technology(&row.get::<String>(7)?)?,
            state: parse_state(&row.get::<String>(8)?)?,
            audience: parse_string_list(&row.get::<String>(9)?)?,
            version_number: row.get(10)?,
            probing_enabled: row.get::<i64>(11)? != 0,
            polling_frequency: row.get(12)?,
            last_request: row.get::<Option<i64>>(13)?.map(millis_to_datetime).transpose()?,
            response_status: row.get::<Option<String>>(14)?.as_deref().map(parse_status).transpose()?,
            response_received: row.get::<Option<i64>>(15)?.map(millis_to_datetime).transpose()?,
        }))
    }

    /// Most recent telemetry points of one service, newest first
    pub async fn recent_points(
        &self,
        eservice_record_id: i64,
        limit: usize,
    ) -> Result<Vec<TelemetryPoint>, CatalogError> {
        let conn = self.get_conn().await.map_err(CatalogError::Pool)?;
        let mut rows = conn
            .query(
                "SELECT measurement, status, response_time, ko_reason, time FROM telemetry_points WHERE eservice_record_id = ? ORDER BY time DESC, id DESC LIMIT ?",
                params![eservice_record_id, limit as i64],
            )
            .await?;

        let mut points = Vec::new();
        while let Some(row) = rows.next().await? {
            points.push(TelemetryPoint {
                measurement: row.get(0)?,
                eservice_record_id,
                status: parse_status(&row.get::<String>(1)?)?,
                response_time: row.get::<Option<i64>>(2)?.map(|v| v as u64),
                ko_reason: row.get(3)?,
                time: millis_to_datetime(row.get(4)?)?,
            });
        }
        Ok(points)
    }
}

#[async_trait]
impl Catalog for DatabaseImpl {
    async fn services_due_for_polling(
        &self,
        offset: u64,
        limit: u32,
    ) -> Result<DuePage, CatalogError> {
        let conn = self.get_conn().await.map_err(CatalogError::Pool)?;
        let now = Utc::now();
        let second_of_day = i64::from(now.num_seconds_from_midnight());
        let now_millis = now.timestamp_millis();

        let mut rows = conn
            .query(&format!("SELECT COUNT(*) FROM eservices WHERE {DUE_FILTER}"), params![second_of_day, now_millis])
            .await?;
        let total_count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)? as u64,
            None => 0,
        };

        let mut rows = conn
            .query(
                &format!(
                    "SELECT eservice_record_id, technology, base_path, audience FROM eservices WHERE {DUE_FILTER} ORDER BY eservice_record_id LIMIT ?3 OFFSET ?4"
                ),
                params![second_of_day, now_millis, i64::from(limit), offset as i64],
            )
            .await?;

        let mut content = Vec::new();
        while let Some(row) = rows.next().await? {
            content.push(DueEService {
                eservice_record_id: row.get(0)?,
                technology: parse_technology(&row.get::<String>(1)?)?,
                base_path: parse_string_list(&row.get::<String>(2)?)?,
                audience: parse_string_list(&row.get::<String>(3)?)?,
            });
        }

        Ok(DuePage { content, total_count })
    }

    async fn update_last_request(
        &self,
        eservice_record_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), CatalogError> {
        let conn = self.get_conn().await.map_err(CatalogError::Pool)?;
        let updated = conn
            .execute(
                "UPDATE eservices SET last_request = ? WHERE eservice_record_id = ?",
                params![at.timestamp_millis(), eservice_record_id],
            )
            .await?;

        if updated == 0 {
            return Err(CatalogError::NotFound(eservice_record_id.to_string()));
        }
        Ok(())
    }

    async fn update_response_received(
        &self,
        eservice_record_id: i64,
        status: ProbeStatus,
        at: DateTime<Utc>,
    ) -> Result<(), CatalogError> {
        let conn = self.get_conn().await.map_err(CatalogError::Pool)?;
        let updated = conn
            .execute(
                "UPDATE eservices SET response_status = ?, response_received = ? WHERE eservice_record_id = ?",
                params![status.as_str(), at.timestamp_millis(), eservice_record_id],
            )
            .await?;

        if updated == 0 {
            return Err(CatalogError::NotFound(eservice_record_id.to_string()));
        }
        Ok(())
    }

    async fn save_eservice(&self, entry: &RegistryEntry) -> Result<i64, CatalogError> {
        let conn = self.get_conn().await.map_err(CatalogError::Pool)?;

        // Probing settings and last known state of an existing row are kept.
        let mut rows = conn
            .query(
                "INSERT INTO eservices (eservice_id, version_id, producer_id, name, producer_name, base_path, technology, state, audience, version_number)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (eservice_id, version_id) DO UPDATE SET
                    producer_id = excluded.producer_id,
                    name = excluded.name,
                    producer_name = excluded.producer_name,
                    base_path = excluded.base_path,
                    technology = excluded.technology,
                    state = excluded.state,
                    audience = excluded.audience,
                    version_number = excluded.version_number
                 RETURNING eservice_record_id",
                params![
                    entry.eservice_id.to_string(),
                    entry.version_id.to_string(),
                    entry.producer_id.to_string(),
                    entry.name.clone(),
                    entry.producer_name.clone(),
                    encode_string_list(&entry.base_path)?,
                    entry.technology.to_string(),
                    entry.state.as_str(),
                    encode_string_list(&entry.audience)?,
                    entry.version_number
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Err(CatalogError::InvalidData("upsert returned no record id".to_string())),
        }
    }
}

#[async_trait]
impl TelemetryStore for DatabaseImpl {
    async fn write_point(&self, point: &TelemetryPoint) -> Result<(), TelemetryError> {
        let conn = self.get_conn().await.map_err(TelemetryError::Pool)?;
        conn.execute(
            "INSERT INTO telemetry_points (measurement, eservice_record_id, status, response_time, ko_reason, time, written_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                point.measurement.clone(),
                point.eservice_record_id,
                point.status.as_str(),
                point.response_time.map(|v| v as i64),
                point.ko_reason.clone(),
                point.time.timestamp_millis(),
                Utc::now().timestamp_millis()
            ],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pipeline::{EServiceState, Technology};
    use tempfile::TempDir;

    /// Helper to create test database
    pub(crate) async fn create_test_database() -> (DatabaseImpl, TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("test.db");
        let database = DatabaseImpl::open(&path.to_string_lossy()).await.unwrap();
        (database, temp_dir)
    }

    pub(crate) fn registry_entry(name: &str) -> RegistryEntry {
        RegistryEntry {
            eservice_id: Uuid::new_v4(),
            version_id: Uuid::new_v4(),
            producer_id: Uuid::new_v4(),
            name: name.to_string(),
            producer_name: "Producer".to_string(),
            base_path: vec!["https://svc.example/v1".to_string()],
            technology: Technology::Rest,
            state: EServiceState::Active,
            audience: vec!["pub".to_string()],
            version_number: 1,
        }
    }

    #[tokio::test]
    async fn test_concurrent_open_of_fresh_file_applies_schema_once() {
        let temp_dir = tempfile::tempdir().unwrap();

        for round in 0..20 {
            let path = temp_dir.path().join(format!("shared-{round}.db"));
            let path = path.to_string_lossy().to_string();

            let (first, second) = tokio::join!(DatabaseImpl::open(&path), DatabaseImpl::open(&path));
            let first = first.unwrap();
            second.unwrap();

            let conn = first.get_conn().await.unwrap();
            let mut rows = conn
                .query("SELECT COUNT(*), MAX(version) FROM schema_migrations", ())
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            assert_eq!(row.get::<i64>(0).unwrap(), 2);
            assert_eq!(row.get::<i64>(1).unwrap(), 2);
        }
    }

    #[tokio::test]
    async fn test_save_eservice_is_idempotent() {
        let (db, _dir) = create_test_database().await;
        let mut entry = registry_entry("first");

        let id = db.save_eservice(&entry).await.unwrap();
        entry.name = "renamed".to_string();
        let again = db.save_eservice(&entry).await.unwrap();
        assert_eq!(id, again);

        let record = db.get_eservice(id).await.unwrap().unwrap();
        assert_eq!(record.name, "renamed");
        assert_eq!(record.base_path, vec!["https://svc.example/v1".to_string()]);
        assert!(record.probing_enabled);
    }

    #[tokio::test]
    async fn test_new_version_gets_its_own_record() {
        let (db, _dir) = create_test_database().await;
        let entry = registry_entry("svc");
        let next_version = RegistryEntry { version_id: Uuid::new_v4(), ..entry.clone() };

        let first = db.save_eservice(&entry).await.unwrap();
        let second = db.save_eservice(&next_version).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_due_services_respect_last_request() {
        let (db, _dir) = create_test_database().await;
        let first = db.save_eservice(&registry_entry("a")).await.unwrap();
        let second = db.save_eservice(&registry_entry("b")).await.unwrap();
        let mut inactive = registry_entry("c");
        inactive.state = EServiceState::Inactive;
        db.save_eservice(&inactive).await.unwrap();

        let page = db.services_due_for_polling(0, 10).await.unwrap();
        assert_eq!(page.total_count, 2);
        let ids: Vec<_> = page.content.iter().map(|s| s.eservice_record_id).collect();
        assert_eq!(ids, vec![first, second]);

        db.update_last_request(first, Utc::now()).await.unwrap();
        let page = db.services_due_for_polling(0, 10).await.unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.content[0].eservice_record_id, second);

        // Default frequency is five minutes.
        let long_ago = Utc::now() - chrono::Duration::minutes(6);
        db.update_last_request(first, long_ago).await.unwrap();
        assert_eq!(db.services_due_for_polling(0, 10).await.unwrap().total_count, 2);
    }

    #[tokio::test]
    async fn test_due_services_are_paged() {
        let (db, _dir) = create_test_database().await;
        for name in ["a", "b", "c"] {
            db.save_eservice(&registry_entry(name)).await.unwrap();
        }

        let first = db.services_due_for_polling(0, 2).await.unwrap();
        let second = db.services_due_for_polling(2, 2).await.unwrap();
        assert_eq!(first.content.len(), 2);
        assert_eq!(second.content.len(), 1);
        assert_eq!(second.total_count, 3);
    }

    #[tokio::test]
    async fn test_response_received_overwrites_state() {
        let (db, _dir) = create_test_database().await;
        let id = db.save_eservice(&registry_entry("svc")).await.unwrap();

        let earlier = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let later = DateTime::from_timestamp_millis(1_700_000_060_000).unwrap();
        db.update_response_received(id, ProbeStatus::Ko, earlier).await.unwrap();
        db.update_response_received(id, ProbeStatus::Ok, later).await.unwrap();

        let record = db.get_eservice(id).await.unwrap().unwrap();
        assert_eq!(record.response_status, Some(ProbeStatus::Ok));
        assert_eq!(record.response_received, Some(later));
    }

    #[tokio::test]
    async fn test_updates_on_missing_record_are_not_found() {
        let (db, _dir) = create_test_database().await;
        let result = db.update_response_received(404, ProbeStatus::Ok, Utc::now()).await;
        assert!(matches!(result, Err(CatalogError::NotFound(id)) if id == "404"));
        let result = db.update_last_request(404, Utc::now()).await;
        assert!(matches!(result, Err(CatalogError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_telemetry_points_are_appended() {
        let (db, _dir) = create_test_database().await;
        let point = TelemetryPoint {
            measurement: "eservices".to_string(),
            eservice_record_id: 42,
            time: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            status: ProbeStatus::Ok,
            response_time: Some(80),
            ko_reason: String::new(),
        };

        db.write_point(&point).await.unwrap();
        db.write_point(&point).await.unwrap();

        let points = db.recent_points(42, 10).await.unwrap();
        assert_eq!(points, vec![point.clone(), point]);
    }
}
