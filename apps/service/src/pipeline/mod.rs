/// Metrics pipeline - the stream between monitors and auditors
///
/// Monitors append [`CheckResult`](crate::monitoring::CheckResult)s through a
/// [`Publisher`]; auditors read them back through [`MessageSource`]s sharing
/// one consumer group. Kafka is the production backend, [`MemoryBroker`]
/// serves local runs.
pub mod dead_letter;
pub mod error;
pub mod kafka;
pub mod memory;
pub mod message;
pub mod traits;

pub use dead_letter::LogDeadLetter;
pub use error::{PublishError, SourceError};
pub use memory::MemoryBroker;
pub use message::{Delivery, Envelope};
pub use traits::{DeadLetterSink, MessageSource, Publisher};

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{BrokerConfig, BrokerKind};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Both ends of the stream, ready to hand to the orchestrator
pub struct Pipeline {
    pub publisher: Arc<dyn Publisher>,
    pub sources: Vec<Arc<dyn MessageSource>>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
}

impl Pipeline {
    /// Build the configured backend with `readers` group members.
    ///
    /// The in-process broker always gets a single reader, which keeps the
    /// results of one site in order.
    pub async fn from_config(config: &BrokerConfig, readers: usize) -> Result<Self, PipelineError> {
        match config.kind {
            BrokerKind::Memory => {
                if readers > 1 {
                    warn!(readers, "in-process broker uses a single reader");
                }
                let broker = MemoryBroker::new(config.topic.clone(), config.memory_capacity);
                Ok(Self::memory(&broker, 1))
            }
            BrokerKind::Kafka => Self::kafka(config, readers).await,
        }
    }

    async fn kafka(config: &BrokerConfig, readers: usize) -> Result<Self, PipelineError> {
        info!(brokers = ?config.brokers, topic = %config.topic, "connecting to Kafka");
        kafka::ensure_topic(config, &config.topic).await?;

        let dead_letters: Arc<dyn DeadLetterSink> = match &config.dead_letter_topic {
            Some(topic) => {
                kafka::ensure_topic(config, topic).await?;
                Arc::new(kafka::KafkaDeadLetter::new(config, topic)?)
            }
            None => Arc::new(LogDeadLetter),
        };

        let mut sources: Vec<Arc<dyn MessageSource>> = Vec::with_capacity(readers);
        for _ in 0..readers {
            sources.push(Arc::new(kafka::KafkaSource::new(config)?));
        }

        Ok(Self { publisher: Arc::new(kafka::KafkaPublisher::new(config)?), sources, dead_letters })
    }

    /// Wire publisher and readers to an in-process broker
    pub fn memory(broker: &MemoryBroker, readers: usize) -> Self {
        Self {
            publisher: Arc::new(broker.publisher()),
            sources: (0..readers)
                .map(|_| Arc::new(broker.subscribe()) as Arc<dyn MessageSource>)
                .collect(),
            dead_letters: Arc::new(LogDeadLetter),
        }
    }
}
