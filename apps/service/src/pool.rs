use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use deadpool::managed::{self, Pool, RecycleError, RecycleResult};
use libsql::{Connection, Database, Error as LibsqlError, params};

use crate::config::DatabaseConfig;

/// Milliseconds a pooled connection waits on a locked database before failing.
const BUSY_TIMEOUT_MS: u64 = 5_000;

pub struct LibsqlManager {
    database: Database,
    recycle_count: AtomicUsize,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self { database, recycle_count: AtomicUsize::new(0) }
    }
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let conn = self.database.connect()?;
        // These pragmas answer with a row, so they go through `query`.
        conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ()).await?;
        conn.query("PRAGMA journal_mode = WAL", ()).await?;
        conn.execute("PRAGMA foreign_keys = ON", ()).await?;
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        let recycle_count = self.recycle_count.fetch_add(1, Ordering::Relaxed) as u64;
        let row = conn
            .query("SELECT ?1", params![recycle_count])
            .await?
            .next()
            .await?
            .ok_or(LibsqlError::QueryReturnedNoRows)?;

        if row.get::<u64>(0)? == recycle_count {
            Ok(())
        } else {
            Err(RecycleError::Message("connection echoed a stale value".into()))
        }
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;

/// Open the local database, build the pool and bring the schema up to date
pub async fn open(config: &DatabaseConfig) -> Result<LibsqlPool> {
    let database = libsql::Builder::new_local(&config.path).build().await?;
    let pool: LibsqlPool = Pool::builder(LibsqlManager::new(database)).max_size(config.pool_size).build()?;

    let conn = pool.get().await?;
    crate::database::initialize_database(&conn).await?;
    tracing::info!(path = %config.path.display(), pool_size = config.pool_size, "database ready");

    Ok(pool)
}
