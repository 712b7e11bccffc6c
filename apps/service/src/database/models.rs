use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::monitoring::types::{CheckResult, Pattern};

/// Site model - a registered monitoring target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub url: String,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub pattern: Pattern,
    pub created_at: DateTime<Utc>,
}

/// A validated registration, not yet persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSite {
    pub url: String,
    pub interval: Duration,
    pub pattern: Pattern,
}

impl NewSite {
    /// Hash backing the one-site-per-URL constraint
    pub fn url_hash(&self) -> String {
        url_hash(&self.url)
    }
}

/// A check result as read back from the results table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResult {
    pub id: i64,
    #[serde(flatten)]
    pub result: CheckResult,
}

pub fn url_hash(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Convert a timestamp to Unix milliseconds
pub fn timestamp_to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert Unix milliseconds to a timestamp
pub fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

pub fn duration_to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

pub fn millis_to_duration(millis: i64) -> Duration {
    Duration::from_millis(u64::try_from(millis).unwrap_or_default())
}
