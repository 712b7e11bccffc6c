/// Database abstraction layer
///
/// Sites and check results live in a local LibSQL database reached through a
/// deadpool connection pool. Everything above this module talks to the
/// [`Store`] trait only.

pub mod migrations;
pub mod models;
pub mod repository;

pub use models::{NewSite, Site, StoredResult};
pub use repository::{LibsqlStore, Store, StoreError};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
