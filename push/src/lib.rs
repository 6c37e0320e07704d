//! # Collegium Push
//!
//! The real-time push fabric: long-lived duplex client sockets subscribing
//! to per-resource streams with format negotiation and aggregation-aware
//! delivery.
//!
//! # Protocol
//!
//! Every frame is a JSON object. The first client frame must authenticate:
//!
//! ```json
//! { "type": "authentication", "userId": "u:cam:alice",
//!   "tenantAlias": "cam", "signature": "…" }
//! ```
//!
//! An unauthenticated socket is closed without a frame once the
//! authentication timeout lapses; a malformed or wrongly signed frame earns
//! a single error frame before the close. Every subsequent client frame
//! carries an `id` the server echoes on `ack`/`error`:
//!
//! ```json
//! { "type": "subscribe", "id": 1, "resourceId": "u:cam:alice",
//!   "streamType": "notification", "format": "internal" }
//! { "type": "close", "id": 2 }
//! ```
//!
//! Delivery frames carry the aggregated entries of one stream in the
//! subscription's format:
//!
//! ```json
//! { "type": "delivery", "streamType": "notification",
//!   "format": "internal", "activities": [ … ], "numNewActivities": 2 }
//! ```
//!
//! Segregation is strict: a subscription receives only activities whose
//! router placed a route on its `(resourceId, streamType)`.
//!
//! The connection engine ([`connection::PushConnection`]) is
//! transport-agnostic (frames in, frames out over channels) with an axum
//! WebSocket adapter in [`handler`]. The [`subscriptions::SubscriptionRegistry`]
//! doubles as the aggregator's push delivery sink.

pub mod connection;
pub mod handler;
pub mod protocol;
pub mod subscriptions;

pub use connection::PushConnection;
pub use protocol::{ClientFrame, ErrorBody, ServerFrame};
pub use subscriptions::SubscriptionRegistry;
