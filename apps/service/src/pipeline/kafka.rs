use std::time::Duration;

use rdkafka::{
    ClientConfig, Message as _, Offset, TopicPartitionList,
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    consumer::{Consumer, StreamConsumer},
    error::{KafkaError, RDKafkaErrorCode},
    producer::{FutureProducer, FutureRecord, Producer},
};
use tracing::{debug, info};

use super::error::{PublishError, SourceError};
use super::message::{Delivery, Envelope};
use super::traits::{DeadLetterSink, MessageSource, Publisher};
use crate::config::BrokerConfig;
use crate::monitoring::types::CheckResult;

/// Connection settings shared by producers, consumers and the admin client.
pub fn client_config(config: &BrokerConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", config.brokers.join(","));

    if let Some(tls) = &config.tls {
        client_config
            .set("security.protocol", "ssl")
            .set("ssl.certificate.location", tls.certificate.to_string_lossy())
            .set("ssl.key.location", tls.key.to_string_lossy())
            .set("ssl.ca.location", tls.ca.to_string_lossy());
    }

    client_config
}

/// Create `topic` unless the cluster already has it.
pub async fn ensure_topic(config: &BrokerConfig, topic: &str) -> Result<(), PublishError> {
    let admin: AdminClient<DefaultClientContext> = client_config(config).create()?;
    let new_topic =
        NewTopic::new(topic, config.partitions, TopicReplication::Fixed(config.replication));

    for outcome in admin.create_topics([&new_topic], &AdminOptions::new()).await? {
        match outcome {
            Ok(name) => info!(topic = %name, partitions = config.partitions, "created topic"),
            Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                debug!(topic = %name, "topic already exists")
            }
            Err((name, code)) => return Err(PublishError::TopicCreation { topic: name, code }),
        }
    }

    Ok(())
}

fn producer(config: &BrokerConfig) -> Result<FutureProducer, PublishError> {
    let producer = client_config(config)
        .set("acks", "all")
        .set("enable.idempotence", "true")
        .set("message.timeout.ms", config.message_timeout.as_millis().to_string())
        .create()?;
    Ok(producer)
}

async fn send(
    producer: &FutureProducer,
    topic: &str,
    key: &[u8],
    payload: &[u8],
    queue_timeout: Duration,
) -> Result<(), PublishError> {
    let record = FutureRecord::to(topic).key(key).payload(payload);

    producer
        .send(record, queue_timeout)
        .await
        .map(|_| ())
        .map_err(|(kafka_error, _)| PublishError::Kafka(kafka_error))
}

/// A Kafka result publisher.
///
/// Delivery retries and acknowledgements are left to librdkafka
/// (`acks=all`, idempotent producer).
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    queue_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(config: &BrokerConfig) -> Result<Self, PublishError> {
        Ok(Self {
            producer: producer(config)?,
            topic: config.topic.clone(),
            queue_timeout: config.message_timeout,
        })
    }
}

#[async_trait::async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, result: &CheckResult) -> Result<(), PublishError> {
        let envelope = Envelope::encode(result)?;
        send(
            &self.producer,
            &self.topic,
            envelope.key.as_bytes(),
            &envelope.payload,
            self.queue_timeout,
        )
        .await
    }

    async fn flush(&self, timeout: Duration) -> Result<(), PublishError> {
        self.producer.flush(timeout).map_err(PublishError::from)
    }
}

/// One member of the auditor consumer group.
///
/// Offsets are stored only after a message is acked, so anything read but
/// not handled is redelivered after a restart or rebalance.
pub struct KafkaSource {
    consumer: StreamConsumer,
}

impl KafkaSource {
    pub fn new(config: &BrokerConfig) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = client_config(config)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[config.topic.as_str()])?;

        Ok(Self { consumer })
    }
}

#[async_trait::async_trait]
impl MessageSource for KafkaSource {
    async fn next(&self) -> Result<Delivery, SourceError> {
        let message = self.consumer.recv().await?;

        Ok(Delivery {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), SourceError> {
        self.consumer.store_offsets(&ack_offsets(delivery)?)?;
        Ok(())
    }
}

/// The group resumes at the offset after the acked message.
fn ack_offsets(delivery: &Delivery) -> Result<TopicPartitionList, KafkaError> {
    let mut offsets = TopicPartitionList::new();
    offsets.add_partition_offset(
        &delivery.topic,
        delivery.partition,
        Offset::Offset(delivery.offset + 1),
    )?;
    Ok(offsets)
}

/// Dead letters re-published verbatim to a side topic. The key records where
/// the message came from and why it was rejected.
pub struct KafkaDeadLetter {
    producer: FutureProducer,
    topic: String,
    queue_timeout: Duration,
}

impl KafkaDeadLetter {
    pub fn new(config: &BrokerConfig, topic: &str) -> Result<Self, PublishError> {
        Ok(Self {
            producer: producer(config)?,
            topic: topic.to_string(),
            queue_timeout: config.message_timeout,
        })
    }
}

#[async_trait::async_trait]
impl DeadLetterSink for KafkaDeadLetter {
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), PublishError> {
        let key = dead_letter_key(delivery, reason);
        send(&self.producer, &self.topic, key.as_bytes(), &delivery.payload, self.queue_timeout)
            .await
    }
}

fn dead_letter_key(delivery: &Delivery, reason: &str) -> String {
    format!("{}@{}:{}|{reason}", delivery.key_lossy(), delivery.partition, delivery.offset)
}
