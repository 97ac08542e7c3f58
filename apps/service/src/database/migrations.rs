use anyhow::Result;
use libsql::{Connection, TransactionBehavior};

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// The catalog and the telemetry store may live in separate files; both get
/// the full schema so either file can serve either role. Everything runs in
/// one immediate transaction, so stage processes opening the same file
/// apply each migration exactly once.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(&tx).await?;

    if current_version >= SCHEMA_VERSION {
        tx.commit().await?;
        tracing::debug!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(&tx).await?;
        record_migration(&tx, 1, "eService catalog").await?;
    }

    if current_version < 2 {
        run_migration_v2(&tx).await?;
        record_migration(&tx, 2, "Telemetry points").await?;
    }

    tx.commit().await?;
    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: eservices table
///
/// `base_path` and `audience` hold JSON arrays. Polling window bounds are
/// seconds since UTC midnight, `polling_frequency` is in minutes and every
/// timestamp is epoch milliseconds.
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS eservices (
            eservice_record_id INTEGER PRIMARY KEY AUTOINCREMENT,
            eservice_id TEXT NOT NULL,
            version_id TEXT NOT NULL,
            producer_id TEXT NOT NULL,
            name TEXT NOT NULL,
            producer_name TEXT NOT NULL DEFAULT '',
            base_path TEXT NOT NULL,
            technology TEXT NOT NULL,
            state TEXT NOT NULL,
            audience TEXT NOT NULL,
            version_number INTEGER NOT NULL DEFAULT 0,
            probing_enabled INTEGER NOT NULL DEFAULT 1,
            polling_start_time INTEGER NOT NULL DEFAULT 0,
            polling_end_time INTEGER NOT NULL DEFAULT 86399,
            polling_frequency INTEGER NOT NULL DEFAULT 5,
            last_request INTEGER,
            response_status TEXT,
            response_received INTEGER,
            UNIQUE (eservice_id, version_id)
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_eservices_polling ON eservices(state, probing_enabled, last_request)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: append-only telemetry points
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS telemetry_points (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            measurement TEXT NOT NULL,
            eservice_record_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            response_time INTEGER,
            ko_reason TEXT NOT NULL DEFAULT '',
            time INTEGER NOT NULL,
            written_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_telemetry_points_eservice ON telemetry_points(eservice_record_id, time)",
        (),
    )
    .await?;

    Ok(())
}
