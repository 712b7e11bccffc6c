use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::checker::Checker;
use crate::database::Site;
use crate::pipeline::Publisher;

/// Lifecycle of a [`Monitor`]. `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorState {
    Idle = 0,
    Running = 1,
    Cancelled = 2,
}

impl MonitorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Cancelled,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("monitor for site {0} is already running")]
    AlreadyRunning(i64),

    #[error("monitor for site {0} was cancelled")]
    Cancelled(i64),
}

/// Periodic probe-and-publish loop for one site.
///
/// The first check fires one interval after [`Monitor::start`]. Cycles run
/// one at a time: a slow probe pushes the next tick back instead of
/// overlapping it.
pub struct Monitor {
    site: Arc<Site>,
    checker: Arc<dyn Checker>,
    publisher: Arc<dyn Publisher>,
    token: CancellationToken,
    state: AtomicU8,
    task: OnceLock<AbortHandle>,
}

impl Monitor {
    /// Build an idle monitor. Cancelling `parent` cancels it too.
    pub fn new(
        site: Arc<Site>,
        checker: Arc<dyn Checker>,
        publisher: Arc<dyn Publisher>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            site,
            checker,
            publisher,
            token: parent.child_token(),
            state: AtomicU8::new(MonitorState::Idle as u8),
            task: OnceLock::new(),
        }
    }

    pub fn site(&self) -> &Arc<Site> {
        &self.site
    }

    pub fn state(&self) -> MonitorState {
        if self.token.is_cancelled() {
            return MonitorState::Cancelled;
        }
        MonitorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Idle or running, i.e. not yet cancelled
    pub fn is_live(&self) -> bool {
        self.state() != MonitorState::Cancelled
    }

    /// Spawn the schedule on `tracker`. Only an idle monitor can start.
    pub fn start(&self, tracker: &TaskTracker) -> Result<(), MonitorError> {
        let site_id = self.site.id;

        match self.state.compare_exchange(
            MonitorState::Idle as u8,
            MonitorState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(current) => {
                return Err(match MonitorState::from_u8(current) {
                    MonitorState::Running => MonitorError::AlreadyRunning(site_id),
                    _ => MonitorError::Cancelled(site_id),
                });
            }
        }

        let task = tracker.spawn(run(
            Arc::clone(&self.site),
            Arc::clone(&self.checker),
            Arc::clone(&self.publisher),
            self.token.clone(),
        ));
        let _ = self.task.set(task.abort_handle());

        Ok(())
    }

    /// Stop scheduling new checks. A cycle already in flight finishes.
    ///
    /// Returns `true` only for the call that performed the transition. A
    /// monitor whose parent token was already cancelled reports `false`.
    pub fn cancel(&self) -> bool {
        let parent_cancelled = self.token.is_cancelled();
        let previous = self.state.swap(MonitorState::Cancelled as u8, Ordering::AcqRel);
        self.token.cancel();
        previous != MonitorState::Cancelled as u8 && !parent_cancelled
    }

    /// Whether the spawned task has exited. A monitor never started counts
    /// as finished.
    pub fn is_finished(&self) -> bool {
        self.task.get().is_none_or(|task| task.is_finished())
    }

    /// Kill the task outright, dropping any in-flight cycle
    pub fn abort(&self) {
        if let Some(task) = self.task.get() {
            task.abort();
        }
    }
}

async fn run(
    site: Arc<Site>,
    checker: Arc<dyn Checker>,
    publisher: Arc<dyn Publisher>,
    token: CancellationToken,
) {
    let site_id = site.id;
    let period = site.interval;

    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(site_id, url = %site.url, interval = ?period, "monitor started");

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = match checker.probe(&site, Utc::now()).await {
            Ok(result) => result,
            Err(failure) => {
                warn!(site_id, error = %failure.source, "probe failed");
                failure.result
            }
        };
        debug!(site_id, %result, "check complete");

        // A lost result is not worth stopping the schedule for.
        if let Err(e) = publisher.publish(&result).await {
            warn!(site_id, error = %e, "failed to publish check result");
        }
    }

    info!(site_id, "monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::monitoring::testing::{FakeChecker, RecordingPublisher, site};

    fn monitor(
        checker: &Arc<FakeChecker>,
        publisher: &Arc<RecordingPublisher>,
        parent: &CancellationToken,
    ) -> Monitor {
        Monitor::new(
            Arc::new(site(7, "https://example.com", Duration::from_secs(10))),
            Arc::clone(checker) as Arc<dyn Checker>,
            Arc::clone(publisher) as Arc<dyn Publisher>,
            parent,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_k_cycles_before_cancel() {
        let checker = Arc::new(FakeChecker::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let tracker = TaskTracker::new();
        let monitor = monitor(&checker, &publisher, &CancellationToken::new());

        monitor.start(&tracker).unwrap();
        assert_eq!(monitor.state(), MonitorState::Running);

        // Ticks at 10s, 20s and 30s.
        time::sleep(Duration::from_secs(35)).await;
        assert!(monitor.cancel());

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(checker.probes(), 3);
        assert_eq!(publisher.published().len(), 3);
        assert!(publisher.published().iter().all(|r| r.site_id == 7));

        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_check_waits_one_interval() {
        let checker = Arc::new(FakeChecker::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let tracker = TaskTracker::new();
        let monitor = monitor(&checker, &publisher, &CancellationToken::new());

        monitor.start(&tracker).unwrap();
        time::sleep(Duration::from_secs(9)).await;
        assert_eq!(checker.probes(), 0);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(checker.probes(), 1);
        monitor.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_cycle_lets_cycle_finish() {
        let checker = Arc::new(FakeChecker::slow(Duration::from_secs(5)));
        let publisher = Arc::new(RecordingPublisher::default());
        let tracker = TaskTracker::new();
        let monitor = monitor(&checker, &publisher, &CancellationToken::new());

        monitor.start(&tracker).unwrap();
        checker.started().notified().await;

        assert!(monitor.cancel());
        assert!(!monitor.cancel());
        assert_eq!(monitor.state(), MonitorState::Cancelled);

        tracker.close();
        tracker.wait().await;

        assert_eq!(checker.probes(), 1);
        assert_eq!(publisher.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_keeps_schedule() {
        let checker = Arc::new(FakeChecker::default());
        let publisher = Arc::new(RecordingPublisher::failing());
        let tracker = TaskTracker::new();
        let monitor = monitor(&checker, &publisher, &CancellationToken::new());

        monitor.start(&tracker).unwrap();
        time::sleep(Duration::from_secs(35)).await;
        monitor.cancel();

        assert_eq!(checker.probes(), 3);
        assert!(publisher.published().is_empty());
        assert_eq!(publisher.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_is_published_and_schedule_continues() {
        let checker = Arc::new(FakeChecker::unreachable());
        let publisher = Arc::new(RecordingPublisher::default());
        let tracker = TaskTracker::new();
        let monitor = monitor(&checker, &publisher, &CancellationToken::new());

        monitor.start(&tracker).unwrap();
        time::sleep(Duration::from_secs(25)).await;
        monitor.cancel();

        let published = publisher.published();
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|r| r.is_fetch_failure() && !r.pattern_matched));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_one_shot() {
        let checker = Arc::new(FakeChecker::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let tracker = TaskTracker::new();
        let monitor = monitor(&checker, &publisher, &CancellationToken::new());

        monitor.start(&tracker).unwrap();
        assert!(matches!(monitor.start(&tracker), Err(MonitorError::AlreadyRunning(7))));

        monitor.cancel();
        assert!(matches!(monitor.start(&tracker), Err(MonitorError::Cancelled(7))));
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_monitor() {
        let parent = CancellationToken::new();
        let checker = Arc::new(FakeChecker::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let tracker = TaskTracker::new();
        let monitor = monitor(&checker, &publisher, &parent);

        monitor.start(&tracker).unwrap();
        parent.cancel();

        tracker.close();
        tracker.wait().await;
        assert!(!monitor.is_live());
        assert!(monitor.is_finished());
        assert!(!monitor.cancel());
        assert_eq!(checker.probes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cancel_reports_one_transition() {
        let checker = Arc::new(FakeChecker::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let monitor = Arc::new(monitor(&checker, &publisher, &CancellationToken::new()));
        let transitions = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                let transitions = Arc::clone(&transitions);
                tokio::spawn(async move {
                    if monitor.cancel() {
                        transitions.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(transitions.load(Ordering::SeqCst), 1);
    }
}
