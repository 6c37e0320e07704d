//! Durable task queue abstraction with at-least-once delivery.
//!
//! Background work rides named queues: one per collection bucket, one for
//! invitation accept fan-out. Delivery is at-least-once (consumers must be
//! idempotent) and each consumer bounds its in-flight work with a per-queue
//! prefetch count.
//!
//! Task payloads travel as bincode bytes wrapped in a [`QueuedTask`]
//! envelope, so the queue layer never deserializes domain types.

use futures::Stream;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::pin::Pin;
use thiserror::Error;

/// Errors from queue operations.
#[derive(Debug, Error, Clone)]
pub enum QueueError {
    /// Could not reach the broker.
    #[error("queue connection failed: {0}")]
    ConnectionFailed(String),

    /// Enqueue failed for a queue.
    #[error("enqueue failed for queue '{queue}': {reason}")]
    EnqueueFailed {
        /// The queue that failed.
        queue: String,
        /// The reason for failure.
        reason: String,
    },

    /// Subscription failed for a queue.
    #[error("subscription failed for queue '{queue}': {reason}")]
    SubscribeFailed {
        /// The queue that failed.
        queue: String,
        /// The reason for failure.
        reason: String,
    },

    /// A payload could not be (de)serialized.
    #[error("task serialization failed: {0}")]
    Serialization(String),

    /// Network or transport error while consuming.
    #[error("queue transport error: {0}")]
    Transport(String),
}

impl From<QueueError> for crate::Error {
    fn from(err: QueueError) -> Self {
        Self::transient(err.to_string())
    }
}

/// A task ready for a queue.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct QueuedTask {
    /// Stable task type identifier, e.g. `"activity/collect"`.
    pub task_type: String,
    /// Bincode-serialized task payload.
    pub data: Vec<u8>,
    /// Optional metadata (correlation ids and the like).
    pub metadata: Option<serde_json::Value>,
}

impl QueuedTask {
    /// Create a task from raw payload bytes.
    #[must_use]
    pub const fn new(
        task_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            task_type,
            data,
            metadata,
        }
    }

    /// Create a task by serializing a payload.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Serialization`] if the payload cannot be
    /// serialized.
    pub fn from_payload<T: Serialize>(
        task_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, QueueError> {
        let data =
            bincode::serialize(payload).map_err(|e| QueueError::Serialization(e.to_string()))?;
        Ok(Self {
            task_type: task_type.into(),
            data,
            metadata: None,
        })
    }

    /// Deserialize the payload.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Serialization`] if the bytes do not decode into
    /// `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        bincode::deserialize(&self.data).map_err(|e| QueueError::Serialization(e.to_string()))
    }
}

/// Stream of tasks from a subscription.
pub type TaskStream = Pin<Box<dyn Stream<Item = Result<QueuedTask, QueueError>> + Send>>;

/// Durable task queue.
///
/// Implementations deliver at-least-once and preserve ordering within a
/// queue partition; consumers must tolerate duplicates.
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task on a named queue.
    fn enqueue(&self, queue: &str, task: &QueuedTask)
    -> BoxFuture<'_, Result<(), QueueError>>;

    /// Subscribe to a named queue.
    ///
    /// At most `prefetch` tasks are buffered ahead of the consumer.
    fn subscribe(&self, queue: &str, prefetch: usize)
    -> BoxFuture<'_, Result<TaskStream, QueueError>>;
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct CollectJob {
        bucket: u32,
    }

    #[test]
    fn payload_roundtrip() {
        let task = QueuedTask::from_payload("activity/collect", &CollectJob { bucket: 3 })
            .expect("serialization should succeed");
        assert_eq!(task.task_type, "activity/collect");

        let job: CollectJob = task.payload().expect("deserialization should succeed");
        assert_eq!(job, CollectJob { bucket: 3 });
    }

    #[test]
    fn payload_type_mismatch_is_an_error() {
        let task = QueuedTask::new("x".to_string(), vec![1], None);
        let result: Result<CollectJob, QueueError> = task.payload();
        assert!(result.is_err());
    }
}
