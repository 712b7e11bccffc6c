use std::fmt;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Value stored in `response_time_ms` and `status_code` when nothing came back.
pub const FETCH_FAILED: i64 = -1;

/// Result of one availability check.
///
/// This is also the wire format published to the metrics stream, hence the
/// short field names on the JSON side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Site that was checked
    pub site_id: i64,

    /// When the probe started (not when it was persisted)
    #[serde(rename = "at")]
    pub checked_at: DateTime<Utc>,

    /// Request start to end of body read, or [`FETCH_FAILED`]
    pub response_time_ms: i64,

    /// HTTP status code, or [`FETCH_FAILED`]
    #[serde(rename = "response_code")]
    pub status_code: i64,

    /// Whether the site pattern was found in the body
    #[serde(rename = "matched")]
    pub pattern_matched: bool,
}

impl CheckResult {
    /// A probe that received a response, whatever its status.
    pub fn reachable(
        site_id: i64,
        checked_at: DateTime<Utc>,
        response_time_ms: u64,
        status_code: u16,
        pattern_matched: bool,
    ) -> Self {
        Self {
            site_id,
            checked_at,
            response_time_ms: i64::try_from(response_time_ms).unwrap_or(i64::MAX),
            status_code: i64::from(status_code),
            pattern_matched,
        }
    }

    /// A probe where the fetch itself failed (DNS, connect, TLS, timeout).
    pub fn unreachable(site_id: i64, checked_at: DateTime<Utc>) -> Self {
        Self {
            site_id,
            checked_at,
            response_time_ms: FETCH_FAILED,
            status_code: FETCH_FAILED,
            pattern_matched: false,
        }
    }

    pub fn is_fetch_failure(&self) -> bool {
        self.status_code == FETCH_FAILED
    }

    /// Stream key: the decimal site id, so one site's results stay ordered.
    pub fn message_key(&self) -> String {
        self.site_id.to_string()
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_fetch_failure() {
            write!(f, "site {} unreachable at {}", self.site_id, self.checked_at.to_rfc3339())
        } else {
            write!(
                f,
                "site {} - status {} - {}ms - matched: {}",
                self.site_id, self.status_code, self.response_time_ms, self.pattern_matched
            )
        }
    }
}

/// Content pattern searched for in a response body.
///
/// An empty pattern matches every body, including an empty one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern {
    source: String,
    regex: Option<Regex>,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let regex = if source.is_empty() { None } else { Some(Regex::new(source)?) };
        Ok(Self { source: source.to_string(), regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_empty(&self) -> bool {
        self.regex.is_none()
    }

    pub fn is_match(&self, body: &str) -> bool {
        self.regex.as_ref().is_none_or(|regex| regex.is_match(body))
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl TryFrom<String> for Pattern {
    type Error = regex::Error;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        Pattern::new(&source)
    }
}

impl From<Pattern> for String {
    fn from(pattern: Pattern) -> Self {
        pattern.source
    }
}
