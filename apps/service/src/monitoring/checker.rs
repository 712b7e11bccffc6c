use chrono::{DateTime, Utc};
use reqwest::Response;
use std::time::Instant;
use tracing::debug;

use super::types::CheckResult;
use crate::config::MonitorConfig;
use crate::database::Site;

/// A fetch that never produced a response.
///
/// Carries the sentinel result so the caller can still publish it.
#[derive(Debug, thiserror::Error)]
#[error("fetch failed for site {}: {source}", .result.site_id)]
pub struct ProbeFailure {
    pub result: CheckResult,
    #[source]
    pub source: reqwest::Error,
}

/// Checker trait for availability probes
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    /// Probe the site once. `at` is recorded as the check time.
    async fn probe(&self, site: &Site, at: DateTime<Utc>) -> Result<CheckResult, ProbeFailure>;
}

/// HTTP/HTTPS checker
pub struct HttpChecker {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpChecker {
    pub fn new(config: &MonitorConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self::with_client(client, config.max_body_bytes))
    }

    pub fn with_client(client: reqwest::Client, max_body_bytes: usize) -> Self {
        Self { client, max_body_bytes }
    }

    /// Read at most `max_body_bytes` of the body. A read error keeps what
    /// arrived so far.
    async fn read_body(&self, mut response: Response, site_id: i64) -> Vec<u8> {
        let mut body = Vec::new();

        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let room = self.max_body_bytes - body.len();
                    if chunk.len() >= room {
                        body.extend_from_slice(&chunk[..room]);
                        debug!(site_id, cap = self.max_body_bytes, "body truncated at cap");
                        break;
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(site_id, error = %e, "body read interrupted");
                    break;
                }
            }
        }

        body
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn probe(&self, site: &Site, at: DateTime<Utc>) -> Result<CheckResult, ProbeFailure> {
        let start = Instant::now();

        let response = match self.client.get(&site.url).send().await {
            Ok(response) => response,
            Err(source) => {
                return Err(ProbeFailure { result: CheckResult::unreachable(site.id, at), source });
            }
        };

        let status_code = response.status().as_u16();
        // The pattern is searched whatever the status code.
        let body = self.read_body(response, site.id).await;
        let latency = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let matched = site.pattern.is_match(&String::from_utf8_lossy(&body));

        Ok(CheckResult::reachable(site.id, at, latency, status_code, matched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::monitoring::types::{FETCH_FAILED, Pattern};

    /// Answer every connection with the same status and body
    async fn serve_fixed(status: u16, body: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {status} Test\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        addr
    }

    fn site(url: String, pattern: &str) -> Site {
        Site {
            id: 1,
            url,
            interval: Duration::from_secs(30),
            pattern: Pattern::new(pattern).unwrap(),
            created_at: Utc::now(),
        }
    }

    fn checker(max_body_bytes: usize) -> HttpChecker {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build().unwrap();
        HttpChecker::with_client(client, max_body_bytes)
    }

    #[tokio::test]
    async fn test_pattern_found_on_success() {
        let addr = serve_fixed(200, "service status: green").await;
        let at = Utc::now();

        let result = checker(1024)
            .probe(&site(format!("http://{addr}/"), "status: green"), at)
            .await
            .unwrap();

        assert_eq!(result.status_code, 200);
        assert!(result.pattern_matched);
        assert!(result.response_time_ms >= 0);
        assert_eq!(result.checked_at, at);
    }

    #[tokio::test]
    async fn test_pattern_evaluated_on_server_error() {
        let addr = serve_fixed(500, "maintenance in progress").await;

        let result = checker(1024)
            .probe(&site(format!("http://{addr}/"), "maintenance"), Utc::now())
            .await
            .unwrap();

        assert_eq!(result.status_code, 500);
        assert!(result.pattern_matched);
    }

    #[tokio::test]
    async fn test_pattern_missing() {
        let addr = serve_fixed(404, "nothing here").await;

        let result = checker(1024)
            .probe(&site(format!("http://{addr}/"), "welcome"), Utc::now())
            .await
            .unwrap();

        assert_eq!(result.status_code, 404);
        assert!(!result.pattern_matched);
    }

    #[tokio::test]
    async fn test_body_beyond_cap_is_not_searched() {
        let addr = serve_fixed(200, "0123456789-needle").await;

        let result = checker(10)
            .probe(&site(format!("http://{addr}/"), "needle"), Utc::now())
            .await
            .unwrap();

        assert_eq!(result.status_code, 200);
        assert!(!result.pattern_matched);
    }

    #[tokio::test]
    async fn test_connection_refused_yields_sentinels() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let failure = checker(1024)
            .probe(&site(format!("http://{addr}/"), ""), Utc::now())
            .await
            .unwrap_err();

        assert_eq!(failure.result.response_time_ms, FETCH_FAILED);
        assert_eq!(failure.result.status_code, FETCH_FAILED);
        assert!(!failure.result.pattern_matched);
    }
}
