//! In-process stand-in for the broker, used for local runs and tests.
//!
//! All readers pull from one queue behind a lock, so every message goes to
//! exactly one reader and messages leave in publish order. Two readers could
//! still persist neighbouring messages of the same site concurrently, which
//! is why [`Pipeline::from_config`](super::Pipeline::from_config) wires a
//! single reader.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::{Mutex, mpsc};

use super::error::{PublishError, SourceError};
use super::message::{Delivery, Envelope};
use super::traits::{MessageSource, Publisher};
use crate::monitoring::types::CheckResult;

pub struct MemoryBroker {
    topic: String,
    tx: mpsc::Sender<Delivery>,
    rx: Arc<Mutex<mpsc::Receiver<Delivery>>>,
    next_offset: Arc<AtomicI64>,
}

impl MemoryBroker {
    /// `capacity` bounds the queue; publishers wait when it is full.
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            topic: topic.into(),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            next_offset: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher {
            topic: self.topic.clone(),
            tx: self.tx.clone(),
            next_offset: Arc::clone(&self.next_offset),
        }
    }

    /// A new reader in the broker's single consumer group
    pub fn subscribe(&self) -> MemorySource {
        MemorySource { rx: Arc::clone(&self.rx) }
    }

    /// Messages appended so far
    pub fn published(&self) -> i64 {
        self.next_offset.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
pub struct MemoryPublisher {
    topic: String,
    tx: mpsc::Sender<Delivery>,
    next_offset: Arc<AtomicI64>,
}

#[async_trait::async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, result: &CheckResult) -> Result<(), PublishError> {
        let envelope = Envelope::encode(result)?;
        let permit = self.tx.reserve().await.map_err(|_| PublishError::Closed)?;

        permit.send(Delivery {
            topic: self.topic.clone(),
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::AcqRel),
            key: Some(envelope.key.into_bytes()),
            payload: envelope.payload,
        });

        Ok(())
    }
}

pub struct MemorySource {
    rx: Arc<Mutex<mpsc::Receiver<Delivery>>>,
}

#[async_trait::async_trait]
impl MessageSource for MemorySource {
    async fn next(&self) -> Result<Delivery, SourceError> {
        self.rx.lock().await.recv().await.ok_or(SourceError::Closed)
    }

    async fn try_next(&self) -> Result<Option<Delivery>, SourceError> {
        Ok(self.rx.lock().await.try_recv().ok())
    }
}
