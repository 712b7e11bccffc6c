#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use beacon::config::{Config, DatabaseConfig};
use beacon::database::LibsqlStore;
use beacon::monitoring::HttpChecker;
use beacon::orchestrator::Orchestrator;
use beacon::pipeline::{MemoryBroker, Pipeline};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Answer every connection with the same status and body
pub async fn serve_fixed(status: u16, body: &'static str) -> SocketAddr {
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

pub async fn temp_store() -> (Arc<LibsqlStore>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig { path: dir.path().join("beacon.db"), pool_size: 4 };
    let pool = beacon::pool::open(&config).await.unwrap();
    (Arc::new(LibsqlStore::new(pool)), dir)
}

/// A running orchestrator on the in-process broker with a real HTTP checker
pub async fn local_orchestrator(store: Arc<LibsqlStore>) -> Orchestrator {
    let mut config = Config::default();
    config.monitor.request_timeout = Duration::from_secs(2);
    config.shutdown.task_deadline = Duration::from_secs(5);
    let config = Arc::new(config);

    let broker = MemoryBroker::new(config.broker.topic.clone(), 64);
    let checker = Arc::new(HttpChecker::new(&config.monitor).unwrap());
    let pipeline = Pipeline::memory(&broker, 1);

    let mut orchestrator = Orchestrator::new(config, store, checker, pipeline);
    orchestrator.start().await.unwrap();
    orchestrator
}
