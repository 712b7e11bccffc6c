/// Orchestrator module - coordinates all components
///
/// The orchestrator is the core coordinator that:
/// - Owns the task trackers monitors and auditors run on
/// - Resumes monitors for stored sites at startup
/// - Runs the shutdown protocol: monitors stop first, then auditors drain
///   what is still queued, all within one deadline after which stragglers
///   are aborted
pub mod auditor;
pub mod registry;

#[cfg(test)]
mod tests;

pub use auditor::{AuditStats, Auditor, RetryPolicy};
pub use registry::{Registry, RegistryError};

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::Store;
use crate::monitoring::Checker;
use crate::pipeline::{DeadLetterSink, MessageSource, Pipeline, Publisher};

/// Main orchestrator for the beacon service
pub struct Orchestrator {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    publisher: Arc<dyn Publisher>,
    sources: Vec<Arc<dyn MessageSource>>,
    dead_letters: Arc<dyn DeadLetterSink>,
    registry: Arc<Registry>,
    monitor_tracker: TaskTracker,
    auditor_tracker: TaskTracker,
    monitors_token: CancellationToken,
    auditors_token: CancellationToken,
    auditor_tasks: Vec<AbortHandle>,
    stats: Arc<AuditStats>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        checker: Arc<dyn Checker>,
        pipeline: Pipeline,
    ) -> Self {
        let monitor_tracker = TaskTracker::new();
        let monitors_token = CancellationToken::new();

        let registry = Arc::new(Registry::new(
            Arc::clone(&store),
            checker,
            Arc::clone(&pipeline.publisher),
            monitor_tracker.clone(),
            monitors_token.clone(),
        ));

        Self {
            config,
            store,
            publisher: pipeline.publisher,
            sources: pipeline.sources,
            dead_letters: pipeline.dead_letters,
            registry,
            monitor_tracker,
            auditor_tracker: TaskTracker::new(),
            monitors_token,
            auditors_token: CancellationToken::new(),
            auditor_tasks: Vec::new(),
            stats: Arc::new(AuditStats::default()),
        }
    }

    /// Spawn the auditors and resume monitoring of stored sites.
    ///
    /// Failing to read the stored sites is fatal.
    pub async fn start(&mut self) -> Result<usize> {
        info!("Starting beacon orchestrator...");
        let policy = RetryPolicy::from(&self.config.auditor);

        for (reader, source) in self.sources.drain(..).enumerate() {
            let auditor = Auditor::new(
                reader,
                source,
                Arc::clone(&self.store),
                Arc::clone(&self.dead_letters),
                policy,
                Arc::clone(&self.stats),
            );
            let task = self.auditor_tracker.spawn(auditor.run(self.auditors_token.clone()));
            self.auditor_tasks.push(task.abort_handle());
        }
        info!(readers = self.auditor_tasks.len(), "auditors started");

        let resumed = self
            .registry
            .resume(self.config.monitor.resume_limit)
            .await
            .context("failed to resume monitors from the store")?;

        info!(resumed, "orchestrator started");
        Ok(resumed)
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn stats(&self) -> Arc<AuditStats> {
        Arc::clone(&self.stats)
    }

    /// Stop everything within `shutdown.task_deadline`.
    ///
    /// Monitors finish their in-flight cycle first, so their last results are
    /// queued before the auditors are told to drain and stop. Returns `false`
    /// when some tasks had to be aborted.
    pub async fn shutdown(&self) -> bool {
        let budget = self.config.shutdown.task_deadline;
        let deadline = Instant::now() + budget;
        info!(?budget, "shutting down orchestrator");
        let mut clean = true;

        self.registry.shutdown_all().await;
        self.monitors_token.cancel();
        self.monitor_tracker.close();

        if timeout_at(deadline, self.monitor_tracker.wait()).await.is_err() {
            warn!(
                remaining = self.monitor_tracker.len(),
                "monitors still running at deadline, aborting"
            );
            self.registry.abort_all().await;
            wait_after_abort(&self.monitor_tracker).await;
            clean = false;
        }

        self.auditors_token.cancel();
        self.auditor_tracker.close();

        if timeout_at(deadline, self.auditor_tracker.wait()).await.is_err() {
            warn!(
                remaining = self.auditor_tracker.len(),
                "auditors still running at deadline, aborting"
            );
            for task in &self.auditor_tasks {
                task.abort();
            }
            wait_after_abort(&self.auditor_tracker).await;
            clean = false;
        }

        if let Err(e) = self.publisher.flush(self.config.broker.message_timeout).await {
            warn!(error = %e, "failed to flush publisher");
        }

        info!(
            persisted = self.stats.persisted(),
            dead_lettered = self.stats.dead_lettered(),
            read_errors = self.stats.read_errors(),
            clean,
            "orchestrator stopped"
        );
        clean
    }
}

/// How long aborted tasks get to unwind
const ABORT_GRACE: Duration = Duration::from_secs(1);

async fn wait_after_abort(tracker: &TaskTracker) {
    if timeout(ABORT_GRACE, tracker.wait()).await.is_err() {
        warn!(remaining = tracker.len(), "tasks did not unwind after abort");
    }
}
