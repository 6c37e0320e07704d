//! The subscription registry: which socket hears which stream, in which
//! formats.
//!
//! The registry also implements [`DeliverySink`], closing the loop from the
//! aggregator: a materialized delivery fans out to every socket subscribed
//! to its `(resource, stream)`, each in the formats it asked for. Sockets
//! subscribed elsewhere see nothing; segregation is the lookup key.

use crate::protocol::ServerFrame;
use collegium_activity::{Delivery, DeliverySink, Format, StreamEntry, StreamType};
use collegium_core::Result;
use collegium_core::principal::PrincipalId;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tokio::sync::mpsc;

/// One socket's registration.
struct SocketHandle {
    principal: PrincipalId,
    sender: mpsc::UnboundedSender<ServerFrame>,
}

/// Per-socket, per-stream subscription state.
#[derive(Default)]
struct Subscriptions {
    /// `(resource id, stream)` → sockets → requested formats.
    by_stream: HashMap<(String, StreamType), HashMap<String, HashSet<Format>>>,
    /// socket → its subscription keys, for cheap unregistration.
    by_socket: HashMap<String, HashSet<(String, StreamType)>>,
}

/// The live subscription table of one process.
#[derive(Default)]
pub struct SubscriptionRegistry {
    sockets: RwLock<HashMap<String, SocketHandle>>,
    subscriptions: RwLock<Subscriptions>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated socket with its outbound channel.
    pub fn register_socket(
        &self,
        socket_id: impl Into<String>,
        principal: PrincipalId,
        sender: mpsc::UnboundedSender<ServerFrame>,
    ) {
        if let Ok(mut sockets) = self.sockets.write() {
            sockets.insert(socket_id.into(), SocketHandle { principal, sender });
        }
    }

    /// Remove a socket and all of its subscriptions.
    pub fn unregister_socket(&self, socket_id: &str) {
        if let Ok(mut sockets) = self.sockets.write() {
            sockets.remove(socket_id);
        }
        if let Ok(mut subs) = self.subscriptions.write() {
            if let Some(keys) = subs.by_socket.remove(socket_id) {
                for key in keys {
                    if let Some(per_socket) = subs.by_stream.get_mut(&key) {
                        per_socket.remove(socket_id);
                        if per_socket.is_empty() {
                            subs.by_stream.remove(&key);
                        }
                    }
                }
            }
        }
    }

    /// The authenticated principal of a socket.
    #[must_use]
    pub fn principal_of(&self, socket_id: &str) -> Option<PrincipalId> {
        self.sockets
            .read()
            .ok()?
            .get(socket_id)
            .map(|handle| handle.principal.clone())
    }

    /// Add a subscription. Repeated subscriptions with new formats
    /// accumulate.
    pub fn subscribe(
        &self,
        socket_id: &str,
        resource_id: impl Into<String>,
        stream_type: StreamType,
        format: Format,
    ) {
        let key = (resource_id.into(), stream_type);
        if let Ok(mut subs) = self.subscriptions.write() {
            subs.by_stream
                .entry(key.clone())
                .or_default()
                .entry(socket_id.to_string())
                .or_default()
                .insert(format);
            subs.by_socket
                .entry(socket_id.to_string())
                .or_default()
                .insert(key);
        }
        metrics::counter!("push.subscribed").increment(1);
    }

    /// Number of live sockets.
    #[must_use]
    pub fn socket_count(&self) -> usize {
        self.sockets.read().map(|sockets| sockets.len()).unwrap_or(0)
    }

    /// Fan one stream's entries out to its subscribers.
    ///
    /// Each subscribed socket receives one delivery frame per format it
    /// requested; sockets subscribed to other streams receive nothing.
    pub fn deliver_stream(
        &self,
        resource_id: &str,
        stream_type: StreamType,
        entries: &HashMap<Format, StreamEntry>,
        num_new_activities: i64,
    ) {
        let key = (resource_id.to_string(), stream_type);
        let targets: Vec<(String, Vec<Format>)> = match self.subscriptions.read() {
            Ok(subs) => subs
                .by_stream
                .get(&key)
                .map(|per_socket| {
                    per_socket
                        .iter()
                        .map(|(socket, formats)| {
                            (socket.clone(), formats.iter().copied().collect())
                        })
                        .collect()
                })
                .unwrap_or_default(),
            Err(_) => return,
        };
        if targets.is_empty() {
            return;
        }

        let sockets = match self.sockets.read() {
            Ok(sockets) => sockets,
            Err(_) => return,
        };
        let mut delivered = 0u64;
        for (socket_id, formats) in targets {
            let Some(handle) = sockets.get(&socket_id) else {
                continue;
            };
            for format in formats {
                let Some(entry) = entries.get(&format) else {
                    continue;
                };
                let frame = ServerFrame::Delivery {
                    stream_type,
                    format,
                    activities: vec![entry.clone()],
                    num_new_activities,
                };
                if handle.sender.send(frame).is_err() {
                    tracing::debug!(socket_id, "delivery to a closed socket dropped");
                } else {
                    delivered += 1;
                }
            }
        }
        if delivered > 0 {
            metrics::counter!("push.delivered").increment(delivered);
        }
    }
}

impl DeliverySink for SubscriptionRegistry {
    fn handles(&self, stream_type: StreamType) -> bool {
        // Email rides its own renderer, not a socket.
        !matches!(stream_type, StreamType::Email)
    }

    fn deliver(&self, delivery: &Delivery) -> BoxFuture<'_, Result<()>> {
        let num_new = delivery
            .entries
            .values()
            .next()
            .map_or(0, |entry| entry.num_new_activities);
        self.deliver_stream(
            delivery.recipient_id.as_str(),
            delivery.stream_type,
            &delivery.entries,
            num_new,
        );
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;

    fn entry(id: &str) -> StreamEntry {
        StreamEntry {
            activity_id: id.to_string(),
            activity_type: "meeting-share".to_string(),
            verb: "share".to_string(),
            published: 1_000,
            actor: collegium_activity::StreamEntryEntity::Single(serde_json::json!({"id": "u:cam:u"})),
            object: None,
            target: None,
            num_new_activities: 1,
        }
    }

    fn principal(id: &str) -> PrincipalId {
        PrincipalId::parse(id).expect("valid principal")
    }

    #[test]
    fn delivery_reaches_only_matching_subscriptions() {
        let registry = SubscriptionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.register_socket("sa", principal("u:cam:a"), tx_a);
        registry.register_socket("sb", principal("u:cam:b"), tx_b);

        registry.subscribe("sa", "u:cam:a", StreamType::Activity, Format::Internal);
        registry.subscribe("sb", "u:cam:b", StreamType::Activity, Format::Internal);

        let mut entries = HashMap::new();
        entries.insert(Format::Internal, entry("x"));
        registry.deliver_stream("u:cam:a", StreamType::Activity, &entries, 1);

        assert!(rx_a.try_recv().is_ok(), "subscriber of the stream hears it");
        assert!(rx_b.try_recv().is_err(), "other streams stay silent");
    }

    #[test]
    fn formats_fan_out_independently() {
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register_socket("s", principal("u:cam:a"), tx);
        registry.subscribe("s", "u:cam:a", StreamType::Notification, Format::Internal);
        registry.subscribe(
            "s",
            "u:cam:a",
            StreamType::Notification,
            Format::ActivityStreams,
        );

        let mut entries = HashMap::new();
        entries.insert(Format::Internal, entry("x"));
        entries.insert(Format::ActivityStreams, entry("x"));
        registry.deliver_stream("u:cam:a", StreamType::Notification, &entries, 3);

        let mut formats = HashSet::new();
        while let Ok(frame) = rx.try_recv() {
            if let ServerFrame::Delivery {
                format,
                num_new_activities,
                ..
            } = frame
            {
                assert_eq!(num_new_activities, 3);
                formats.insert(format);
            }
        }
        assert_eq!(formats.len(), 2, "one frame per requested format");
    }

    #[test]
    fn unregister_removes_all_subscriptions() {
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register_socket("s", principal("u:cam:a"), tx);
        registry.subscribe("s", "u:cam:a", StreamType::Activity, Format::Internal);

        registry.unregister_socket("s");
        assert_eq!(registry.socket_count(), 0);

        let mut entries = HashMap::new();
        entries.insert(Format::Internal, entry("x"));
        registry.deliver_stream("u:cam:a", StreamType::Activity, &entries, 1);
        assert!(rx.try_recv().is_err());
    }
}
