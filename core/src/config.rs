//! Typed configuration for the activity and messaging core.
//!
//! The configuration store itself lives outside the core; the hosting
//! application reads whatever backend it uses and materializes these structs
//! at startup. Defaults match the documented key set.

use std::time::Duration;

/// Configuration of the activity routing, aggregation and collection
/// machinery.
///
/// Key mapping:
///
/// | key | field | default |
/// |---|---|---|
/// | `activity.activityTtl` | `activity_ttl` | 2 weeks |
/// | `activity.aggregateIdleExpiry` | `aggregate_idle_expiry` | 3 h |
/// | `activity.aggregateMaxExpiry` | `aggregate_max_expiry` | 24 h |
/// | `activity.numberOfProcessingBuckets` | `number_of_processing_buckets` | 5 |
/// | `activity.collectionExpiry` | `collection_expiry` | 60 s |
/// | `activity.maxConcurrentCollections` | `max_concurrent_collections` | 3 |
/// | `activity.collectionPollingFrequency` | `collection_polling_frequency` | 5 s (`None` disables) |
/// | `activity.collectionBatchSize` | `collection_batch_size` | 500 |
/// | `activity.processActivityJobs` | `process_activity_jobs` | true |
#[derive(Debug, Clone)]
pub struct ActivityConfig {
    /// How long materialized stream entries live.
    pub activity_ttl: Duration,
    /// An aggregate stops absorbing activity after sitting idle this long.
    pub aggregate_idle_expiry: Duration,
    /// An aggregate stops absorbing activity this long after creation,
    /// however busy it stays.
    pub aggregate_max_expiry: Duration,
    /// Number of hash partitions of the pending-route space.
    pub number_of_processing_buckets: u32,
    /// TTL of a bucket collection lock; crash recovery horizon.
    pub collection_expiry: Duration,
    /// Upper bound on collection cycles in flight in one process.
    pub max_concurrent_collections: usize,
    /// Cadence of the collection poller; `None` disables polling entirely.
    pub collection_polling_frequency: Option<Duration>,
    /// Maximum pending entries drained in one cycle.
    pub collection_batch_size: usize,
    /// Whether this process runs collectors at all.
    pub process_activity_jobs: bool,
}

impl ActivityConfig {
    /// Set the stream-entry TTL.
    #[must_use]
    pub const fn with_activity_ttl(mut self, ttl: Duration) -> Self {
        self.activity_ttl = ttl;
        self
    }

    /// Set the aggregate idle expiry.
    #[must_use]
    pub const fn with_aggregate_idle_expiry(mut self, expiry: Duration) -> Self {
        self.aggregate_idle_expiry = expiry;
        self
    }

    /// Set the aggregate max expiry.
    #[must_use]
    pub const fn with_aggregate_max_expiry(mut self, expiry: Duration) -> Self {
        self.aggregate_max_expiry = expiry;
        self
    }

    /// Set the number of processing buckets.
    #[must_use]
    pub const fn with_buckets(mut self, buckets: u32) -> Self {
        self.number_of_processing_buckets = buckets;
        self
    }

    /// Set the collection lock expiry.
    #[must_use]
    pub const fn with_collection_expiry(mut self, expiry: Duration) -> Self {
        self.collection_expiry = expiry;
        self
    }

    /// Set the collection concurrency bound.
    #[must_use]
    pub const fn with_max_concurrent_collections(mut self, max: usize) -> Self {
        self.max_concurrent_collections = max;
        self
    }

    /// Set the polling cadence; `None` disables the poller.
    #[must_use]
    pub const fn with_polling_frequency(mut self, frequency: Option<Duration>) -> Self {
        self.collection_polling_frequency = frequency;
        self
    }

    /// Set the per-cycle batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.collection_batch_size = size;
        self
    }

    /// Enable or disable collection in this process.
    #[must_use]
    pub const fn with_process_activity_jobs(mut self, process: bool) -> Self {
        self.process_activity_jobs = process;
        self
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            activity_ttl: Duration::from_secs(1_209_600),
            aggregate_idle_expiry: Duration::from_millis(10_800_000),
            aggregate_max_expiry: Duration::from_millis(86_400_000),
            number_of_processing_buckets: 5,
            collection_expiry: Duration::from_millis(60_000),
            max_concurrent_collections: 3,
            collection_polling_frequency: Some(Duration::from_millis(5_000)),
            collection_batch_size: 500,
            process_activity_jobs: true,
        }
    }
}

/// Message queue configuration (`mq.*`).
#[derive(Debug, Clone)]
pub struct MqConfig {
    /// Per-queue prefetch count (`mq.prefetchCount`).
    pub prefetch_count: usize,
}

impl MqConfig {
    /// Set the prefetch count.
    #[must_use]
    pub const fn with_prefetch_count(mut self, count: usize) -> Self {
        self.prefetch_count = count;
        self
    }
}

impl Default for MqConfig {
    fn default() -> Self {
        Self { prefetch_count: 15 }
    }
}

/// Signing configuration (`signing.*`).
#[derive(Clone)]
pub struct SigningConfig {
    /// The key bytes behind every resource-signature HMAC (`signing.key`).
    pub key: Vec<u8>,
}

impl SigningConfig {
    /// Wrap the configured key bytes.
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }
}

impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("SigningConfig").finish_non_exhaustive()
    }
}

/// Push fabric configuration.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// How long a fresh socket may sit silent before authentication.
    pub authentication_timeout: Duration,
}

impl PushConfig {
    /// Set the authentication timeout.
    #[must_use]
    pub const fn with_authentication_timeout(mut self, timeout: Duration) -> Self {
        self.authentication_timeout = timeout;
        self
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            authentication_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_defaults_match_documented_keys() {
        let cfg = ActivityConfig::default();
        assert_eq!(cfg.activity_ttl, Duration::from_secs(1_209_600));
        assert_eq!(cfg.aggregate_idle_expiry, Duration::from_millis(10_800_000));
        assert_eq!(cfg.aggregate_max_expiry, Duration::from_millis(86_400_000));
        assert_eq!(cfg.number_of_processing_buckets, 5);
        assert_eq!(cfg.collection_expiry, Duration::from_millis(60_000));
        assert_eq!(cfg.max_concurrent_collections, 3);
        assert_eq!(
            cfg.collection_polling_frequency,
            Some(Duration::from_millis(5_000))
        );
        assert_eq!(cfg.collection_batch_size, 500);
        assert!(cfg.process_activity_jobs);
    }

    #[test]
    fn builder_setters_compose() {
        let cfg = ActivityConfig::default()
            .with_buckets(8)
            .with_batch_size(100)
            .with_polling_frequency(None);
        assert_eq!(cfg.number_of_processing_buckets, 8);
        assert_eq!(cfg.collection_batch_size, 100);
        assert!(cfg.collection_polling_frequency.is_none());
    }

    #[test]
    fn mq_default_prefetch() {
        assert_eq!(MqConfig::default().prefetch_count, 15);
    }
}
