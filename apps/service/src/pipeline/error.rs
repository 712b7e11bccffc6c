use rdkafka::error::{KafkaError, RDKafkaErrorCode};

/// Errors raised while appending to the metrics stream
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The result could not be serialized
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Kafka error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// The broker refused to create a topic
    #[error("topic {topic} could not be created: {code}")]
    TopicCreation { topic: String, code: RDKafkaErrorCode },

    /// The in-process stream has no consumers left
    #[error("stream closed")]
    Closed,
}

/// Errors raised while reading from the metrics stream
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Kafka error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// No more messages will ever arrive
    #[error("stream closed")]
    Closed,
}
