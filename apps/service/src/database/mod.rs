//! Embedded storage for the catalog and the telemetry store.
//!
//! Both collaborators can run against one local libsql file when no remote
//! catalog service is configured.

pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::DatabaseImpl;

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
