//! # Collegium Activity
//!
//! The activity subsystem: turning posted activity seeds into ordered,
//! aggregated, per-recipient stream entries, and fanning materialized
//! entries out to push, notification and email consumers.
//!
//! # Data flow
//!
//! ```text
//! postActivity(seed)
//!       │
//!       ▼
//! ┌────────────┐  produce entities, expand associations,
//! │   Router   │  propagation-filter, de-duplicate
//! └─────┬──────┘
//!       │ routes, bucketized by recipient hash
//!       ▼
//! ┌────────────┐  per-bucket pending queue + collection trigger
//! │  Pending   │
//! └─────┬──────┘
//!       │ one cycle: bucket lock, batch read
//!       ▼
//! ┌────────────┐  grouping keys, idle/max windows, merge or fresh
//! │ Aggregator │
//! └─────┬──────┘
//!       │ stream entries per (recipient, stream, format), TTL'd
//!       ▼
//! ┌────────────┐  push sockets, notification & email producers
//! │   Sinks    │
//! └────────────┘
//! ```
//!
//! # Extensibility
//!
//! The [`registry::ActivityRegistry`] is the polymorphism boundary: every
//! domain module registers its `object_type` vtable (producer, two
//! transformers, propagation, named associations) and its activity types
//! (grouping tuples, per-stream router specs) at startup. Nothing in this
//! crate names a concrete domain entity.

pub mod aggregator;
pub mod model;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod sinks;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

pub use aggregator::ActivityAggregator;
pub use model::{
    ActivitySeed, ActivitySeedResource, Format, PersistentActivityEntity, RoutedActivity,
    StreamEntry, StreamEntryEntity, StreamType, Visibility,
};
pub use registry::{ActivityRegistry, ActivityTypeDefinition, EntityType, GroupBySpec};
pub use router::ActivityRouter;
pub use scheduler::{CollectionScheduler, SchedulerHandle};
pub use sinks::{Delivery, DeliverySink};
pub use store::{ActivityStore, AggregateStatus};
