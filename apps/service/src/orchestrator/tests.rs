/// Tests for the orchestrator lifecycle
///
/// These tests verify:
/// - Startup resumes stored sites and starts the auditors
/// - Shutdown completes within the deadline
/// - A check in flight at shutdown still reaches the store
/// - Hung probes are aborted once the deadline passes, stopped ones included
use crate::config::{Config, DatabaseConfig};
use crate::database::{LibsqlStore, NewSite, Store};
use crate::monitoring::testing::FakeChecker;
use crate::monitoring::{Pattern, RegisterSite};
use crate::orchestrator::Orchestrator;
use crate::pipeline::{MemoryBroker, Pipeline};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn create_test_store() -> Result<(Arc<LibsqlStore>, TempDir)> {
    let temp_dir = tempfile::tempdir()?;
    let config = DatabaseConfig { path: temp_dir.path().join("test.db"), pool_size: 4 };
    let pool = crate::pool::open(&config).await?;
    Ok((Arc::new(LibsqlStore::new(pool)), temp_dir))
}

fn test_config(task_deadline: Duration) -> Arc<Config> {
    let mut config = Config::default();
    config.shutdown.task_deadline = task_deadline;
    config.auditor.readers = 2;
    Arc::new(config)
}

#[tokio::test]
async fn test_start_resumes_stored_sites() -> Result<()> {
    let (store, _dir) = create_test_store().await?;
    for i in 0..2 {
        store
            .insert_site(&NewSite {
                url: format!("https://resume{i}.example.com"),
                interval: Duration::from_secs(60),
                pattern: Pattern::new("")?,
            })
            .await?;
    }

    let broker = MemoryBroker::new("metrics", 16);
    let mut orchestrator = Orchestrator::new(
        test_config(Duration::from_secs(5)),
        store,
        Arc::new(FakeChecker::default()),
        Pipeline::memory(&broker, 2),
    );

    assert_eq!(orchestrator.start().await?, 2);
    assert_eq!(orchestrator.registry().active().await.len(), 2);

    assert!(orchestrator.shutdown().await);
    assert!(orchestrator.registry().active().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_registered_results_reach_the_store() -> Result<()> {
    let (store, _dir) = create_test_store().await?;
    let broker = MemoryBroker::new("metrics", 16);
    let mut orchestrator = Orchestrator::new(
        test_config(Duration::from_secs(5)),
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::new(FakeChecker::default()),
        Pipeline::memory(&broker, 2),
    );
    orchestrator.start().await?;

    let site = orchestrator
        .registry()
        .register(RegisterSite {
            url: "https://example.com".into(),
            interval: Duration::from_secs(1),
            pattern: String::new(),
        })
        .await?;

    let mut stored = Vec::new();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stored = store.list_results_for_site(site.id, 20).await?;
        if stored.len() >= 2 {
            break;
        }
    }
    assert!(stored.len() >= 2, "expected results to be persisted, got {}", stored.len());
    assert!(stored.iter().all(|r| r.result.status_code == 200));

    assert!(orchestrator.shutdown().await);
    assert!(orchestrator.stats().persisted() >= 2);
    Ok(())
}

#[tokio::test]
async fn test_hung_probe_is_aborted_at_deadline() -> Result<()> {
    let (store, _dir) = create_test_store().await?;
    let broker = MemoryBroker::new("metrics", 16);
    let checker = Arc::new(FakeChecker::slow(Duration::from_secs(3600)));
    let mut orchestrator = Orchestrator::new(
        test_config(Duration::from_millis(200)),
        store,
        Arc::clone(&checker) as Arc<dyn crate::monitoring::Checker>,
        Pipeline::memory(&broker, 1),
    );
    orchestrator.start().await?;

    orchestrator
        .registry()
        .register(RegisterSite {
            url: "https://slow.example.com".into(),
            interval: Duration::from_secs(1),
            pattern: String::new(),
        })
        .await?;
    checker.started().notified().await;

    let clean = tokio::time::timeout(Duration::from_secs(5), orchestrator.shutdown()).await?;
    assert!(!clean);
    assert_eq!(checker.probes(), 0);
    Ok(())
}

#[tokio::test]
async fn test_in_flight_result_is_stored_on_shutdown() -> Result<()> {
    let (store, _dir) = create_test_store().await?;
    let broker = MemoryBroker::new("metrics", 16);
    let checker = Arc::new(FakeChecker::slow(Duration::from_millis(500)));
    let mut orchestrator = Orchestrator::new(
        test_config(Duration::from_secs(5)),
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&checker) as Arc<dyn crate::monitoring::Checker>,
        Pipeline::memory(&broker, 2),
    );
    orchestrator.start().await?;

    let site = orchestrator
        .registry()
        .register(RegisterSite {
            url: "https://in-flight.example.com".into(),
            interval: Duration::from_secs(1),
            pattern: String::new(),
        })
        .await?;
    checker.started().notified().await;

    assert!(orchestrator.shutdown().await);
    assert_eq!(checker.probes(), 1);
    assert_eq!(store.list_results_for_site(site.id, 20).await?.len(), 1);
    assert_eq!(orchestrator.stats().persisted(), 1);
    Ok(())
}

#[tokio::test]
async fn test_stopped_monitor_is_aborted_at_deadline() -> Result<()> {
    let (store, _dir) = create_test_store().await?;
    let broker = MemoryBroker::new("metrics", 16);
    let checker = Arc::new(FakeChecker::slow(Duration::from_secs(3600)));
    let mut orchestrator = Orchestrator::new(
        test_config(Duration::from_millis(200)),
        store,
        Arc::clone(&checker) as Arc<dyn crate::monitoring::Checker>,
        Pipeline::memory(&broker, 1),
    );
    orchestrator.start().await?;

    let registry = orchestrator.registry();
    let site = registry
        .register(RegisterSite {
            url: "https://stopped.example.com".into(),
            interval: Duration::from_secs(1),
            pattern: String::new(),
        })
        .await?;
    checker.started().notified().await;
    registry.stop(site.id).await?;

    let clean = tokio::time::timeout(Duration::from_secs(5), orchestrator.shutdown()).await?;
    assert!(!clean);
    assert_eq!(checker.probes(), 0);
    Ok(())
}
