//! Delivery sinks: where materialized stream entries fan out after a
//! collection cycle.
//!
//! The aggregator does not know who consumes its output. Push delivery,
//! notification production and email production each register a sink; the
//! email and notification sinks hand structured entries to an external
//! renderer, nothing is rendered here.

use crate::model::{Format, StreamEntry, StreamType};
use collegium_core::Result;
use collegium_core::principal::PrincipalId;
use futures::future::BoxFuture;
use std::collections::HashMap;

/// One materialized delivery: the same entry in every format, addressed to
/// one recipient stream.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The recipient.
    pub recipient_id: PrincipalId,
    /// The recipient's stream.
    pub stream_type: StreamType,
    /// The entry per format.
    pub entries: HashMap<Format, StreamEntry>,
}

/// A consumer of materialized deliveries.
pub trait DeliverySink: Send + Sync {
    /// Whether this sink consumes the given stream.
    fn handles(&self, stream_type: StreamType) -> bool;

    /// Deliver one materialized entry.
    ///
    /// Failures are logged by the aggregator and never stall the cycle.
    fn deliver(&self, delivery: &Delivery) -> BoxFuture<'_, Result<()>>;
}

/// A sink that only traces deliveries. Useful as a placeholder while wiring
/// a deployment up.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DeliverySink for TracingSink {
    fn handles(&self, _stream_type: StreamType) -> bool {
        true
    }

    fn deliver(&self, delivery: &Delivery) -> BoxFuture<'_, Result<()>> {
        tracing::debug!(
            recipient = %delivery.recipient_id,
            stream = %delivery.stream_type,
            formats = delivery.entries.len(),
            "delivery traced"
        );
        Box::pin(async { Ok(()) })
    }
}
