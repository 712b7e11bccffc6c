//! Registration payloads and their validation.
//!
//! Every payload that can create a site implements [`Validate`], which turns
//! the raw request into a [`NewSite`] or says exactly what is wrong with it.

use serde::{Deserialize, Deserializer};
use std::time::Duration;
use url::Url;

use super::types::Pattern;
use crate::database::NewSite;

/// Shortest accepted check interval
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
/// Longest accepted check interval (24 hours)
pub const MAX_INTERVAL: Duration = Duration::from_secs(86_400);

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("port 0 is not valid")]
    InvalidPort,

    #[error("check interval {0:?} is shorter than the minimum of {MIN_INTERVAL:?}")]
    IntervalTooShort(Duration),

    #[error("check interval {0:?} is longer than the maximum of {MAX_INTERVAL:?}")]
    IntervalTooLong(Duration),

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// A payload that knows how to check itself before it is acted on.
pub trait Validate {
    type Valid;

    fn validate(self) -> Result<Self::Valid, ValidationError>;
}

/// Body of a site registration request
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterSite {
    pub url: String,
    /// `"30s"`, `"1m 30s"` or a plain number of seconds
    #[serde(deserialize_with = "deserialize_interval")]
    pub interval: Duration,
    #[serde(default)]
    pub pattern: String,
}

impl Validate for RegisterSite {
    type Valid = NewSite;

    fn validate(self) -> Result<NewSite, ValidationError> {
        validate_http_target(&self.url)?;
        validate_check_interval(self.interval)?;
        let pattern = Pattern::new(&self.pattern)?;

        Ok(NewSite { url: self.url, interval: self.interval, pattern })
    }
}

/// Validate HTTP/HTTPS target
fn validate_http_target(target: &str) -> Result<(), ValidationError> {
    let url = Url::parse(target)?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(ValidationError::MissingHost);
    }

    if url.port() == Some(0) {
        return Err(ValidationError::InvalidPort);
    }

    Ok(())
}

/// Validate check interval bounds
pub fn validate_check_interval(interval: Duration) -> Result<(), ValidationError> {
    if interval < MIN_INTERVAL {
        return Err(ValidationError::IntervalTooShort(interval));
    }

    if interval > MAX_INTERVAL {
        return Err(ValidationError::IntervalTooLong(interval));
    }

    Ok(())
}

fn deserialize_interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawInterval {
        Seconds(u64),
        Text(String),
    }

    match RawInterval::deserialize(deserializer)? {
        RawInterval::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
        RawInterval::Text(text) => {
            let text = text.trim();
            if let Ok(seconds) = text.parse::<u64>() {
                return Ok(Duration::from_secs(seconds));
            }
            humantime_serde::re::humantime::parse_duration(text).map_err(serde::de::Error::custom)
        }
    }
}
