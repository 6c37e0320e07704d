//! Kafka-backed task queue for the Collegium platform.
//!
//! Implements the [`TaskQueue`] trait from `collegium-core` on a
//! Kafka-compatible broker: one topic per queue, at-least-once delivery
//! with manual offset commits, and a bounded in-process buffer sized by the
//! consumer's prefetch count.
//!
//! # Delivery Semantics
//!
//! - Offsets are committed only after a task has been handed to the
//!   consumer's channel; a crash before the commit redelivers the task.
//! - Consumers must be idempotent: collection triggers and accept fan-out
//!   tasks both are.
//! - Ordering holds within a partition; tasks are keyed by task type.
//!
//! # Example
//!
//! ```no_run
//! use collegium_kafka::KafkaTaskQueue;
//! use collegium_core::queue::{QueuedTask, TaskQueue};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = KafkaTaskQueue::new("localhost:9092")?;
//!
//! let task = QueuedTask::new("activity/collect".to_string(), vec![1, 2, 3], None);
//! queue.enqueue("activity-bucket-0", &task).await?;
//!
//! let mut stream = queue.subscribe("activity-bucket-0", 15).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(task) => println!("received {}", task.task_type),
//!         Err(e) => eprintln!("stream error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use collegium_core::queue::{QueueError, QueuedTask, TaskQueue, TaskStream};
use futures::future::BoxFuture;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Kafka task queue.
///
/// Producer settings (acks, compression, timeout) and consumer settings
/// (group, offset reset) are configured through the builder; every
/// subscription creates its own consumer against the stored broker list.
pub struct KafkaTaskQueue {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    auto_offset_reset: String,
}

impl KafkaTaskQueue {
    /// Create a task queue with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] when the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, QueueError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder.
    #[must_use]
    pub fn builder() -> KafkaTaskQueueBuilder {
        KafkaTaskQueueBuilder::default()
    }

    /// The configured broker list.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for a [`KafkaTaskQueue`].
#[derive(Default)]
pub struct KafkaTaskQueueBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl KafkaTaskQueueBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    /// Default: `"1"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec. Default: `"none"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group shared by this process's subscriptions.
    ///
    /// Unset, each queue gets a group derived from its name, so every node
    /// of the cluster shares each queue's workload.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Where new consumer groups start reading: `"earliest"` or `"latest"`.
    /// Default: `"latest"`.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] when brokers are unset or
    /// the producer cannot be created.
    pub fn build(self) -> Result<KafkaTaskQueue, QueueError> {
        let brokers = self
            .brokers
            .ok_or_else(|| QueueError::ConnectionFailed("brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            QueueError::ConnectionFailed(format!("failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            "KafkaTaskQueue created"
        );

        Ok(KafkaTaskQueue {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            auto_offset_reset: self.auto_offset_reset.unwrap_or_else(|| "latest".to_string()),
        })
    }
}

impl TaskQueue for KafkaTaskQueue {
    fn enqueue(&self, queue: &str, task: &QueuedTask) -> BoxFuture<'_, Result<(), QueueError>> {
        let queue = queue.to_string();
        let task = task.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload =
                bincode::serialize(&task).map_err(|e| QueueError::EnqueueFailed {
                    queue: queue.clone(),
                    reason: format!("failed to serialize task: {e}"),
                })?;

            // Tasks of one type share a partition, which keeps their order.
            let record = FutureRecord::to(&queue)
                .payload(&payload)
                .key(task.task_type.as_bytes());

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        queue = %queue,
                        partition,
                        offset,
                        task_type = %task.task_type,
                        "task enqueued"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(queue = %queue, error = %kafka_error, "enqueue failed");
                    Err(QueueError::EnqueueFailed {
                        queue,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        queue: &str,
        prefetch: usize,
    ) -> BoxFuture<'_, Result<TaskStream, QueueError>> {
        let queue = queue.to_string();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer_group_id =
                consumer_group.unwrap_or_else(|| format!("collegium-{queue}"));

            // Manual commits give at-least-once delivery.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| QueueError::SubscribeFailed {
                    queue: queue.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[queue.as_str()])
                .map_err(|e| QueueError::SubscribeFailed {
                    queue: queue.clone(),
                    reason: format!("failed to subscribe: {e}"),
                })?;

            tracing::info!(
                queue = %queue,
                consumer_group = %consumer_group_id,
                prefetch,
                "subscribed to queue"
            );

            // The channel bound is the prefetch: at most that many tasks
            // sit between the broker consumer and the worker.
            let (tx, rx) = tokio::sync::mpsc::channel(prefetch.max(1));

            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();
                while let Some(next) = stream.next().await {
                    match next {
                        Ok(message) => {
                            let task_result = match message.payload() {
                                Some(payload) => bincode::deserialize::<QueuedTask>(payload)
                                    .map_err(|e| {
                                        QueueError::Serialization(format!(
                                            "failed to deserialize task: {e}"
                                        ))
                                    }),
                                None => Err(QueueError::Serialization(
                                    "message has no payload".to_string(),
                                )),
                            };

                            // Commit only after the task reached the
                            // channel; a crash before this point redelivers.
                            if tx.send(task_result).await.is_err() {
                                tracing::debug!("task consumer dropped, stopping");
                                break;
                            }
                            if let Err(error) =
                                consumer.commit_message(&message, CommitMode::Async)
                            {
                                tracing::warn!(
                                    topic = message.topic(),
                                    offset = message.offset(),
                                    %error,
                                    "offset commit failed (task may be redelivered)"
                                );
                            }
                        }
                        Err(error) => {
                            let err = QueueError::Transport(format!(
                                "failed to receive message: {error}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                tracing::debug!("queue consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };
            Ok(Box::pin(stream) as TaskStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_task_queue_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<KafkaTaskQueue>();
        assert_sync::<KafkaTaskQueue>();
    }

    #[test]
    fn builder_requires_brokers() {
        assert!(KafkaTaskQueue::builder().build().is_err());
    }
}
