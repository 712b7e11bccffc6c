use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Row, params};

use super::models::{
    NewSite, Site, StoredResult, duration_to_millis, millis_to_duration, millis_to_timestamp,
    timestamp_to_millis,
};
use crate::monitoring::types::{CheckResult, Pattern};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Errors surfaced by a [`Store`]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("site already registered: {0}")]
    DuplicateSite(String),

    #[error("site {0} not found")]
    SiteNotFound(i64),

    #[error("result {0} not found")]
    ResultNotFound(i64),

    #[error("stored pattern does not compile: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool::managed::PoolError<libsql::Error>),
}

impl StoreError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Pool(_))
    }
}

/// Persistence interface for sites and results
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a new site; fails with [`StoreError::DuplicateSite`] if the URL is taken
    async fn insert_site(&self, site: &NewSite) -> Result<Site, StoreError>;

    async fn get_site(&self, id: i64) -> Result<Site, StoreError>;

    /// Most recently registered sites first
    async fn list_sites(&self, limit: usize) -> Result<Vec<Site>, StoreError>;

    /// Persist one check result and return its row id
    async fn insert_result(&self, result: &CheckResult) -> Result<i64, StoreError>;

    async fn get_result(&self, id: i64) -> Result<StoredResult, StoreError>;

    /// Latest results for a site, newest check first, at most `limit` rows.
    ///
    /// An unknown site is [`StoreError::SiteNotFound`]; a known site without
    /// results is an empty list.
    async fn list_results_for_site(
        &self,
        site_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredResult>, StoreError>;
}

/// LibSQL store implementation
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    pub fn new(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, StoreError> {
        Ok(self.pool.get().await?)
    }

    async fn site_exists(conn: &Connection, id: i64) -> Result<bool, StoreError> {
        let mut rows = conn.query("SELECT 1 FROM sites WHERE id = ?", params![id]).await?;
        Ok(rows.next().await?.is_some())
    }
}

const SITE_COLUMNS: &str = "id, url, interval_ms, pattern, created_at";
const RESULT_COLUMNS: &str = "id, site_id, checked_at, response_time_ms, response_code, matched";

fn site_from_row(row: &Row) -> Result<Site, StoreError> {
    let pattern: String = row.get(3)?;

    Ok(Site {
        id: row.get(0)?,
        url: row.get(1)?,
        interval: millis_to_duration(row.get(2)?),
        pattern: Pattern::new(&pattern)?,
        created_at: millis_to_timestamp(row.get(4)?),
    })
}

fn result_from_row(row: &Row) -> Result<StoredResult, StoreError> {
    Ok(StoredResult {
        id: row.get(0)?,
        result: CheckResult {
            site_id: row.get(1)?,
            checked_at: millis_to_timestamp(row.get(2)?),
            response_time_ms: row.get(3)?,
            status_code: row.get(4)?,
            pattern_matched: row.get::<i64>(5)? != 0,
        },
    })
}

fn violates(error: &libsql::Error, constraint: &str) -> bool {
    error.to_string().contains(constraint)
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl Store for LibsqlStore {
    async fn insert_site(&self, site: &NewSite) -> Result<Site, StoreError> {
        let conn = self.get_conn().await?;
        // Round-trip through millis so the returned value equals what a read gives back.
        let created_at = millis_to_timestamp(timestamp_to_millis(Utc::now()));

        conn.execute(
            "INSERT INTO sites (site_hash, url, interval_ms, pattern, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                site.url_hash(),
                site.url.clone(),
                duration_to_millis(site.interval),
                site.pattern.as_str().to_string(),
                timestamp_to_millis(created_at)
            ],
        )
        .await
        .map_err(|e| {
            if violates(&e, "UNIQUE constraint failed") {
                StoreError::DuplicateSite(site.url.clone())
            } else {
                StoreError::Database(e)
            }
        })?;

        Ok(Site {
            id: conn.last_insert_rowid(),
            url: site.url.clone(),
            interval: site.interval,
            pattern: site.pattern.clone(),
            created_at,
        })
    }

    async fn get_site(&self, id: i64) -> Result<Site, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {SITE_COLUMNS} FROM sites WHERE id = ?"), params![id])
            .await?;

        match rows.next().await? {
            Some(row) => site_from_row(&row),
            None => Err(StoreError::SiteNotFound(id)),
        }
    }

    async fn list_sites(&self, limit: usize) -> Result<Vec<Site>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {SITE_COLUMNS} FROM sites ORDER BY created_at DESC, id DESC LIMIT ?"),
                params![limit_param(limit)],
            )
            .await?;

        let mut sites = Vec::new();
        while let Some(row) = rows.next().await? {
            sites.push(site_from_row(&row)?);
        }

        Ok(sites)
    }

    async fn insert_result(&self, result: &CheckResult) -> Result<i64, StoreError> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO results (site_id, checked_at, response_time_ms, response_code, matched) VALUES (?, ?, ?, ?, ?)",
            params![
                result.site_id,
                timestamp_to_millis(result.checked_at),
                result.response_time_ms,
                result.status_code,
                if result.pattern_matched { 1 } else { 0 }
            ],
        )
        .await
        .map_err(|e| {
            if violates(&e, "FOREIGN KEY constraint failed") {
                StoreError::SiteNotFound(result.site_id)
            } else {
                StoreError::Database(e)
            }
        })?;

        Ok(conn.last_insert_rowid())
    }

    async fn get_result(&self, id: i64) -> Result<StoredResult, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {RESULT_COLUMNS} FROM results WHERE id = ?"), params![id])
            .await?;

        match rows.next().await? {
            Some(row) => result_from_row(&row),
            None => Err(StoreError::ResultNotFound(id)),
        }
    }

    async fn list_results_for_site(
        &self,
        site_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredResult>, StoreError> {
        let conn = self.get_conn().await?;

        if !Self::site_exists(&conn, site_id).await? {
            return Err(StoreError::SiteNotFound(site_id));
        }

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM results WHERE site_id = ? ORDER BY checked_at DESC, id DESC LIMIT ?"
                ),
                params![site_id, limit_param(limit)],
            )
            .await?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            results.push(result_from_row(&row)?);
        }

        Ok(results)
    }
}
