//! The collection scheduler: bucketed, lock-protected parallel collectors.
//!
//! Pending routes land in one of `numberOfProcessingBuckets` buckets. A
//! collection cycle drains up to `collectionBatchSize` entries of one bucket
//! under a TTL lock (`collectionExpiry`) and hands them to the aggregator.
//! Cycles on different buckets run in parallel, bounded by
//! `maxConcurrentCollections`; cycles on the same bucket are mutually
//! excluded by the lock. A crashed collector's bucket frees itself when the
//! lock TTL lapses.
//!
//! Collections are driven two ways: a polling tick
//! (`collectionPollingFrequency`, disable with `None`) and collection
//! triggers the router parks on each bucket's task queue.

use crate::aggregator::ActivityAggregator;
use crate::router::{CollectTrigger, activity_bucket_queue};
use crate::store::ActivityStore;
use collegium_core::config::{ActivityConfig, MqConfig};
use collegium_core::locking::LockService;
use collegium_core::queue::TaskQueue;
use collegium_core::{Error, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

/// Drives collection cycles over the pending buckets.
pub struct CollectionScheduler {
    aggregator: Arc<ActivityAggregator>,
    store: Arc<dyn ActivityStore>,
    locks: Arc<dyn LockService>,
    queue: Arc<dyn TaskQueue>,
    config: ActivityConfig,
    mq_config: MqConfig,
    semaphore: Arc<Semaphore>,
}

/// Handle on a started scheduler: signals shutdown and stops its tasks.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop the scheduler. In-flight cycles are aborted; their bucket locks
    /// recover via TTL.
    pub fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            task.abort();
        }
    }

    /// Whether the scheduler spawned any tasks (it does not when
    /// `processActivityJobs` is off).
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.tasks.is_empty()
    }
}

impl CollectionScheduler {
    /// Assemble the scheduler.
    #[must_use]
    pub fn new(
        aggregator: Arc<ActivityAggregator>,
        store: Arc<dyn ActivityStore>,
        locks: Arc<dyn LockService>,
        queue: Arc<dyn TaskQueue>,
        config: ActivityConfig,
        mq_config: MqConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_collections.max(1)));
        Self {
            aggregator,
            store,
            locks,
            queue,
            config,
            mq_config,
            semaphore,
        }
    }

    /// Run one collection cycle on a bucket.
    ///
    /// Returns the number of pending entries drained; zero when the bucket
    /// was empty or its lock was held elsewhere.
    ///
    /// # Errors
    ///
    /// Aggregation or storage failures propagate after the lock is
    /// released; the drained entries stay pending for the next cycle.
    pub async fn collect_bucket(&self, bucket: u32) -> Result<usize> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::transient("collection scheduler is shutting down"))?;

        let lock_key = format!("activity:collect:{bucket}");
        let Some(lock) = self
            .locks
            .acquire(&lock_key, self.config.collection_expiry)
            .await?
        else {
            tracing::trace!(bucket, "bucket locked elsewhere, skipping cycle");
            return Ok(0);
        };

        let outcome = self.drain_locked(bucket).await;

        if let Err(error) = self.locks.release(lock).await {
            tracing::debug!(%error, bucket, "bucket lock release failed, TTL will recover");
        }

        match outcome {
            Ok(drained) => {
                if drained > 0 {
                    metrics::counter!("activity.collected").increment(drained as u64);
                    tracing::debug!(bucket, drained, "collection cycle complete");
                }
                Ok(drained)
            }
            Err(error) => {
                tracing::error!(%error, bucket, "collection cycle failed");
                Err(error)
            }
        }
    }

    /// Attempt one cycle on every bucket, sequentially. The poller's tick.
    pub async fn collect_all(&self) -> usize {
        let mut drained = 0;
        for bucket in 0..self.config.number_of_processing_buckets {
            match self.collect_bucket(bucket).await {
                Ok(count) => drained += count,
                Err(error) => {
                    // One bad bucket never stops the sweep.
                    tracing::warn!(%error, bucket, "bucket collection failed during sweep");
                }
            }
        }
        drained
    }

    /// Start the background poller and the per-bucket trigger consumers.
    ///
    /// Returns an inactive handle when `processActivityJobs` is off.
    #[must_use]
    pub fn start(self: &Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        if !self.config.process_activity_jobs {
            tracing::info!("activity job processing disabled in this process");
            return SchedulerHandle {
                shutdown: shutdown_tx,
                tasks,
            };
        }

        if let Some(frequency) = self.config.collection_polling_frequency {
            let scheduler = Arc::clone(self);
            let mut shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(frequency);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            for bucket in 0..scheduler.config.number_of_processing_buckets {
                                let scheduler = Arc::clone(&scheduler);
                                tokio::spawn(async move {
                                    if let Err(error) = scheduler.collect_bucket(bucket).await {
                                        tracing::warn!(%error, bucket, "polled collection failed");
                                    }
                                });
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                tracing::debug!("collection poller stopped");
            }));
        }

        for bucket in 0..self.config.number_of_processing_buckets {
            let scheduler = Arc::clone(self);
            let mut shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                let queue_name = activity_bucket_queue(bucket);
                let stream = scheduler
                    .queue
                    .subscribe(&queue_name, scheduler.mq_config.prefetch_count)
                    .await;
                let mut stream = match stream {
                    Ok(stream) => stream,
                    Err(error) => {
                        tracing::error!(%error, bucket, "bucket trigger subscription failed");
                        return;
                    }
                };
                loop {
                    tokio::select! {
                        next = stream.next() => {
                            match next {
                                Some(Ok(task)) => {
                                    let trigger: CollectTrigger = match task.payload() {
                                        Ok(trigger) => trigger,
                                        Err(error) => {
                                            tracing::warn!(%error, bucket, "malformed collection trigger");
                                            continue;
                                        }
                                    };
                                    if let Err(error) =
                                        scheduler.collect_bucket(trigger.bucket).await
                                    {
                                        tracing::warn!(%error, bucket = trigger.bucket, "triggered collection failed");
                                    }
                                }
                                Some(Err(error)) => {
                                    tracing::warn!(%error, bucket, "bucket trigger stream error");
                                }
                                None => break,
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                tracing::debug!(bucket, "bucket trigger consumer stopped");
            }));
        }

        tracing::info!(
            buckets = self.config.number_of_processing_buckets,
            max_concurrent = self.config.max_concurrent_collections,
            polling = ?self.config.collection_polling_frequency,
            "collection scheduler started"
        );
        SchedulerHandle {
            shutdown: shutdown_tx,
            tasks,
        }
    }

    /// Drain one batch while holding the bucket lock.
    async fn drain_locked(&self, bucket: u32) -> Result<usize> {
        let pending = self
            .store
            .read_pending(bucket, self.config.collection_batch_size)
            .await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let (seqs, routes): (Vec<u64>, Vec<_>) = pending.into_iter().unzip();
        self.aggregator.aggregate_batch(routes).await?;
        self.store.delete_pending(bucket, &seqs).await?;
        Ok(seqs.len())
    }
}
