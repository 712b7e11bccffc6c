use tracing::error;

use super::error::PublishError;
use super::message::Delivery;
use super::traits::DeadLetterSink;

/// Dead-letter sink that writes the rejected message to the audit log.
///
/// Used when no dead-letter topic is configured.
pub struct LogDeadLetter;

#[async_trait::async_trait]
impl DeadLetterSink for LogDeadLetter {
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), PublishError> {
        error!(
            target: "beacon::audit",
            key = %delivery.key_lossy(),
            partition = delivery.partition,
            offset = delivery.offset,
            payload = %String::from_utf8_lossy(&delivery.payload),
            "dead letter: {reason}"
        );
        Ok(())
    }
}
