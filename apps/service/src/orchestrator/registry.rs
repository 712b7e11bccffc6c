use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::database::{NewSite, Site, Store, StoreError};
use crate::monitoring::{Checker, Monitor, MonitorError, Validate, ValidationError};
use crate::pipeline::Publisher;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("site {0} is already registered")]
    Duplicate(String),

    #[error("site {0} already has a live monitor")]
    AlreadyMonitored(i64),

    #[error("site {0} has no live monitor")]
    NotMonitored(i64),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

impl From<StoreError> for RegistryError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::DuplicateSite(url) => Self::Duplicate(url),
            other => Self::Store(other),
        }
    }
}

/// Owner of every [`Monitor`], keyed by site id.
///
/// Stopped monitors stay in the map until their site is monitored again, and
/// a replaced monitor whose task has not exited yet is kept in `retired`, so
/// [`Registry::abort_all`] reaches every task still running. The lock is
/// only taken to insert or iterate; store calls happen outside it.
pub struct Registry {
    store: Arc<dyn Store>,
    checker: Arc<dyn Checker>,
    publisher: Arc<dyn Publisher>,
    tracker: TaskTracker,
    token: CancellationToken,
    monitors: Mutex<Monitors>,
}

#[derive(Default)]
struct Monitors {
    by_site: HashMap<i64, Arc<Monitor>>,
    retired: Vec<Arc<Monitor>>,
}

impl Registry {
    /// Monitors run on `tracker` and are cancelled along with `token`.
    pub fn new(
        store: Arc<dyn Store>,
        checker: Arc<dyn Checker>,
        publisher: Arc<dyn Publisher>,
        tracker: TaskTracker,
        token: CancellationToken,
    ) -> Self {
        Self { store, checker, publisher, tracker, token, monitors: Mutex::new(Monitors::default()) }
    }

    /// Validate, persist and start monitoring a new site.
    ///
    /// A URL that is already registered is rejected and nothing is started.
    pub async fn register<P>(&self, payload: P) -> Result<Site, RegistryError>
    where
        P: Validate<Valid = NewSite>,
    {
        let new_site = payload.validate()?;
        let site = self.store.insert_site(&new_site).await?;
        info!(site_id = site.id, url = %site.url, "site registered");

        self.start_monitor(Arc::new(site.clone())).await?;
        Ok(site)
    }

    /// Start a monitor for an already persisted site.
    ///
    /// A cancelled monitor for the same site is replaced; a live one is not.
    pub async fn start_monitor(&self, site: Arc<Site>) -> Result<(), RegistryError> {
        let site_id = site.id;
        let mut monitors = self.monitors.lock().await;

        if monitors.by_site.get(&site_id).is_some_and(|m| m.is_live()) {
            return Err(RegistryError::AlreadyMonitored(site_id));
        }

        let monitor = Arc::new(Monitor::new(
            site,
            Arc::clone(&self.checker),
            Arc::clone(&self.publisher),
            &self.token,
        ));
        monitor.start(&self.tracker)?;

        monitors.retired.retain(|m| !m.is_finished());
        if let Some(previous) = monitors.by_site.insert(site_id, monitor) {
            if !previous.is_finished() {
                monitors.retired.push(previous);
            }
        }

        Ok(())
    }

    /// Start monitors for the `limit` most recently created sites.
    ///
    /// Returns how many monitors were started. Sites that already have a
    /// live monitor are skipped.
    pub async fn resume(&self, limit: usize) -> Result<usize, RegistryError> {
        let sites = self.store.list_sites(limit).await?;
        let mut started = 0;

        for site in sites {
            let site_id = site.id;
            match self.start_monitor(Arc::new(site)).await {
                Ok(()) => started += 1,
                Err(RegistryError::AlreadyMonitored(_)) => {
                    debug!(site_id, "already monitored, not resuming")
                }
                Err(e) => return Err(e),
            }
        }

        info!(started, limit, "resumed monitors");
        Ok(started)
    }

    /// Cancel the monitor of one site. The site itself stays stored, and so
    /// does the cancelled monitor until the site is started again.
    pub async fn stop(&self, site_id: i64) -> Result<(), RegistryError> {
        let monitors = self.monitors.lock().await;

        match monitors.by_site.get(&site_id) {
            Some(monitor) if monitor.cancel() => {
                info!(site_id, "monitor stopped on request");
                Ok(())
            }
            _ => Err(RegistryError::NotMonitored(site_id)),
        }
    }

    /// Cancel every monitor without waiting for them.
    ///
    /// Returns how many monitors this call cancelled.
    pub async fn shutdown_all(&self) -> usize {
        let monitors = self.monitors.lock().await;
        let cancelled = monitors.by_site.values().filter(|m| m.cancel()).count();
        info!(cancelled, "monitors cancelled");
        cancelled
    }

    /// Abort every monitor task, stopped ones included, dropping in-flight
    /// cycles
    pub async fn abort_all(&self) {
        let monitors = self.monitors.lock().await;
        for monitor in monitors.by_site.values().chain(&monitors.retired) {
            monitor.abort();
        }
    }

    /// Sites with a live monitor, ordered by id
    pub async fn active(&self) -> Vec<Arc<Site>> {
        let monitors = self.monitors.lock().await;
        let mut sites: Vec<_> = monitors
            .by_site
            .values()
            .filter(|m| m.is_live())
            .map(|m| Arc::clone(m.site()))
            .collect();
        sites.sort_by_key(|site| site.id);
        sites
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
