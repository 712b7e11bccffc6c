use std::time::Duration;

use super::error::{PublishError, SourceError};
use super::message::Delivery;
use crate::monitoring::types::CheckResult;

/// Appends check results to an ordered, keyed stream.
///
/// Results for one site keep their order; nothing is promised across sites.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    /// Append one result keyed by its site id.
    async fn publish(&self, result: &CheckResult) -> Result<(), PublishError>;

    /// Flush any buffered messages, waiting up to `timeout`.
    async fn flush(&self, _timeout: Duration) -> Result<(), PublishError> {
        Ok(())
    }
}

/// One reader's view of the stream. Readers sharing a group split the
/// messages between them.
#[async_trait::async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next message.
    async fn next(&self) -> Result<Delivery, SourceError>;

    /// Take a message only if one is already waiting.
    ///
    /// Used to drain a reader on shutdown. Sources that redeliver
    /// unacknowledged messages to the group can keep the default.
    async fn try_next(&self) -> Result<Option<Delivery>, SourceError> {
        Ok(None)
    }

    /// Mark a message as handled so it is not redelivered to the group.
    async fn ack(&self, _delivery: &Delivery) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Where messages go when they cannot be persisted.
#[async_trait::async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), PublishError>;
}
