//! Test doubles shared by the monitoring and orchestrator tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use super::checker::{Checker, ProbeFailure};
use super::types::{CheckResult, Pattern};
use crate::database::Site;
use crate::pipeline::{PublishError, Publisher};

pub fn site(id: i64, url: &str, interval: Duration) -> Site {
    Site {
        id,
        url: url.to_string(),
        interval,
        pattern: Pattern::new("").unwrap(),
        created_at: Utc::now(),
    }
}

#[derive(Default)]
pub struct FakeChecker {
    delay: Option<Duration>,
    unreachable: bool,
    probes: AtomicUsize,
    started: Arc<Notify>,
}

impl FakeChecker {
    /// Every probe takes `delay` of (tokio) time
    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    /// Every probe fails at the transport level
    pub fn unreachable() -> Self {
        Self { unreachable: true, ..Self::default() }
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Signalled when a probe begins
    pub fn started(&self) -> Arc<Notify> {
        Arc::clone(&self.started)
    }
}

#[async_trait::async_trait]
impl Checker for FakeChecker {
    async fn probe(&self, site: &Site, at: DateTime<Utc>) -> Result<CheckResult, ProbeFailure> {
        self.started.notify_one();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.probes.fetch_add(1, Ordering::SeqCst);

        if self.unreachable {
            // An unparseable URL is the cheapest way to get a real reqwest::Error.
            let source = reqwest::Client::new().get("not a url").build().unwrap_err();
            return Err(ProbeFailure { result: CheckResult::unreachable(site.id, at), source });
        }

        Ok(CheckResult::reachable(site.id, at, 12, 200, true))
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    fail: bool,
    attempts: AtomicUsize,
    published: Mutex<Vec<CheckResult>>,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<CheckResult> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, result: &CheckResult) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PublishError::Closed);
        }
        self.published.lock().unwrap().push(result.clone());
        Ok(())
    }
}
