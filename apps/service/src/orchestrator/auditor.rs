//! Stream readers that persist check results.
//!
//! Several auditors share one consumer group, so each message is handled by
//! exactly one of them. A message that cannot be decoded, or that still
//! cannot be stored after a few attempts, goes to the dead-letter sink and
//! the reader moves on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AuditorConfig;
use crate::database::{Store, StoreError};
use crate::monitoring::CheckResult;
use crate::pipeline::{DeadLetterSink, Delivery, MessageSource, SourceError};

/// Counters shared by all readers
#[derive(Debug, Default)]
pub struct AuditStats {
    persisted: AtomicU64,
    dead_lettered: AtomicU64,
    read_errors: AtomicU64,
}

impl AuditStats {
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total tries per message, including the first
    pub attempts: u32,
    /// Wait before the second try; grows linearly after that
    pub backoff: Duration,
}

impl From<&AuditorConfig> for RetryPolicy {
    fn from(config: &AuditorConfig) -> Self {
        Self { attempts: config.persist_attempts.max(1), backoff: config.retry_backoff }
    }
}

pub struct Auditor {
    reader: usize,
    source: Arc<dyn MessageSource>,
    store: Arc<dyn Store>,
    dead_letters: Arc<dyn DeadLetterSink>,
    policy: RetryPolicy,
    stats: Arc<AuditStats>,
}

impl Auditor {
    pub fn new(
        reader: usize,
        source: Arc<dyn MessageSource>,
        store: Arc<dyn Store>,
        dead_letters: Arc<dyn DeadLetterSink>,
        policy: RetryPolicy,
        stats: Arc<AuditStats>,
    ) -> Self {
        Self { reader, source, store, dead_letters, policy, stats }
    }

    /// Read until `token` is cancelled or the stream closes.
    ///
    /// A message already being handled when the token fires is finished first,
    /// then whatever is still waiting in the source is drained.
    pub async fn run(self, token: CancellationToken) {
        let reader = self.reader;
        info!(reader, "auditor started");

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.drain().await;
                    break;
                }
                next = self.source.next() => next,
            };

            match next {
                Ok(delivery) => self.handle(&delivery).await,
                Err(SourceError::Closed) => {
                    info!(reader, "stream closed");
                    break;
                }
                Err(e) => {
                    self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(reader, error = %e, "failed to read from stream");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.policy.backoff) => {}
                    }
                }
            }
        }

        info!(reader, "auditor stopped");
    }

    async fn drain(&self) {
        let mut drained = 0u64;
        loop {
            match self.source.try_next().await {
                Ok(Some(delivery)) => {
                    self.handle(&delivery).await;
                    drained += 1;
                }
                Ok(None) | Err(SourceError::Closed) => break,
                Err(e) => {
                    warn!(reader = self.reader, error = %e, "failed to drain stream");
                    break;
                }
            }
        }
        if drained > 0 {
            info!(reader = self.reader, drained, "drained queued messages");
        }
    }

    async fn handle(&self, delivery: &Delivery) {
        let outcome = match delivery.decode() {
            Ok(result) => self
                .persist(&result)
                .await
                .map_err(|e| format!("failed to persist result: {e}")),
            Err(e) => Err(format!("undecodable message: {e}")),
        };

        if let Err(reason) = outcome {
            self.dead_letter(delivery, &reason).await;
        }

        if let Err(e) = self.source.ack(delivery).await {
            warn!(reader = self.reader, offset = delivery.offset, error = %e, "failed to ack message");
        }
    }

    async fn persist(&self, result: &CheckResult) -> Result<i64, StoreError> {
        let mut attempt = 1;

        loop {
            match self.store.insert_result(result).await {
                Ok(id) => {
                    self.stats.persisted.fetch_add(1, Ordering::Relaxed);
                    debug!(reader = self.reader, site_id = result.site_id, result_id = id, "result stored");
                    return Ok(id);
                }
                Err(e) if e.is_transient() && attempt < self.policy.attempts => {
                    warn!(
                        reader = self.reader,
                        site_id = result.site_id,
                        attempt,
                        error = %e,
                        "store unavailable, retrying"
                    );
                    tokio::time::sleep(self.policy.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) {
        self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
        warn!(reader = self.reader, offset = delivery.offset, reason, "dead-lettering message");

        if let Err(e) = self.dead_letters.dead_letter(delivery, reason).await {
            error!(
                target: "beacon::audit",
                key = %delivery.key_lossy(),
                offset = delivery.offset,
                payload = %String::from_utf8_lossy(&delivery.payload),
                error = %e,
                "dead letter could not be delivered: {reason}"
            );
        }
    }
}
