//! The connection engine: one authenticated socket's protocol state
//! machine.
//!
//! Transport-agnostic: raw JSON text frames arrive on a channel and server
//! frames leave on another, so the protocol is testable without a
//! WebSocket. The axum adapter in [`crate::handler`] bridges the channels
//! to a real socket.

use crate::protocol::{ClientFrame, FrameError, ServerFrame};
use crate::subscriptions::SubscriptionRegistry;
use collegium_activity::{Format, StreamType};
use collegium_core::access::PermissionsOracle;
use collegium_core::config::PushConfig;
use collegium_core::principal::{PrincipalId, ResourceRef};
use collegium_core::signing::Signer;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One socket's protocol driver.
pub struct PushConnection {
    registry: Arc<SubscriptionRegistry>,
    signer: Arc<Signer>,
    permissions: Arc<dyn PermissionsOracle>,
    config: PushConfig,
    socket_id: String,
}

impl PushConnection {
    /// Create the driver for a fresh socket.
    #[must_use]
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        signer: Arc<Signer>,
        permissions: Arc<dyn PermissionsOracle>,
        config: PushConfig,
    ) -> Self {
        Self {
            registry,
            signer,
            permissions,
            config,
            socket_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// The socket's id in the registry.
    #[must_use]
    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    /// Drive the socket until it closes.
    ///
    /// Dropping `outgoing`'s receiving side, or this function returning,
    /// ends the connection; the transport adapter closes the socket when
    /// the outgoing channel closes.
    pub async fn run(
        self,
        mut incoming: mpsc::Receiver<String>,
        outgoing: mpsc::UnboundedSender<ServerFrame>,
    ) {
        let principal = match self.authenticate(&mut incoming, &outgoing).await {
            Some(principal) => principal,
            None => return,
        };

        self.registry
            .register_socket(&self.socket_id, principal.clone(), outgoing.clone());
        metrics::counter!("push.connected").increment(1);
        tracing::debug!(socket_id = %self.socket_id, principal = %principal, "socket authenticated");

        while let Some(text) = incoming.recv().await {
            match ClientFrame::parse(&text) {
                Ok(ClientFrame::Authentication { .. }) => {
                    // Double authentication is a protocol error.
                    let _ = outgoing.send(ServerFrame::error(None, 400, "already authenticated"));
                    break;
                }
                Ok(ClientFrame::Subscribe {
                    id,
                    resource_id,
                    stream_type,
                    token,
                    format,
                }) => {
                    let response = self
                        .subscribe(&principal, id, resource_id, &stream_type, token, format)
                        .await;
                    let _ = outgoing.send(response);
                }
                Ok(ClientFrame::Close { id }) => {
                    let _ = outgoing.send(ServerFrame::Ack { id });
                    break;
                }
                Err(FrameError::MissingId) => {
                    let _ = outgoing.send(ServerFrame::error(None, 400, "frame id is required"));
                    break;
                }
                Err(FrameError::Malformed) => {
                    let _ = outgoing.send(ServerFrame::error(None, 400, "malformed frame"));
                    break;
                }
            }
        }

        self.registry.unregister_socket(&self.socket_id);
        tracing::debug!(socket_id = %self.socket_id, "socket closed");
    }

    /// The authentication phase.
    ///
    /// A silent socket is closed without a frame when the timeout lapses; a
    /// malformed or wrongly signed frame earns one error frame before the
    /// close.
    async fn authenticate(
        &self,
        incoming: &mut mpsc::Receiver<String>,
        outgoing: &mpsc::UnboundedSender<ServerFrame>,
    ) -> Option<PrincipalId> {
        let first = tokio::time::timeout(self.config.authentication_timeout, incoming.recv()).await;
        let text = match first {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(_) => {
                tracing::debug!(socket_id = %self.socket_id, "authentication timeout");
                return None;
            }
        };

        let frame = match ClientFrame::parse(&text) {
            Ok(frame @ ClientFrame::Authentication { .. }) => frame,
            _ => {
                let _ = outgoing.send(ServerFrame::error(
                    None,
                    401,
                    "the first frame must authenticate",
                ));
                return None;
            }
        };
        let ClientFrame::Authentication {
            user_id,
            tenant_alias,
            signature,
        } = frame
        else {
            return None;
        };

        if !self.signer.verify(&[&user_id, &tenant_alias], &signature) {
            let _ = outgoing.send(ServerFrame::error(None, 401, "invalid signature"));
            return None;
        }
        match PrincipalId::parse(user_id) {
            Ok(principal) if principal.is_user() => Some(principal),
            _ => {
                let _ = outgoing.send(ServerFrame::error(None, 401, "invalid user id"));
                None
            }
        }
    }

    /// Validate and install one subscription.
    async fn subscribe(
        &self,
        principal: &PrincipalId,
        id: Value,
        resource_id: String,
        stream_type: &str,
        token: Option<String>,
        format: Option<String>,
    ) -> ServerFrame {
        let Some(stream_type) = StreamType::parse(stream_type) else {
            return ServerFrame::error(Some(id), 400, "unknown stream type");
        };
        if stream_type == StreamType::Email {
            return ServerFrame::error(Some(id), 400, "email streams are not subscribable");
        }
        let format = match format {
            Some(raw) => match Format::parse(&raw) {
                Some(format) => format,
                None => return ServerFrame::error(Some(id), 400, "unknown format"),
            },
            None => Format::ActivityStreams,
        };

        // Notification streams exist only for users, and only for the
        // socket's own identity.
        if stream_type == StreamType::Notification && resource_id != principal.as_str() {
            return ServerFrame::error(Some(id), 401, "notification streams are personal");
        }

        if !self.may_view(principal, &resource_id, token.as_deref()).await {
            return ServerFrame::error(Some(id), 401, "no view access to resource");
        }

        self.registry
            .subscribe(&self.socket_id, resource_id, stream_type, format);
        ServerFrame::Ack { id }
    }

    /// Access check: a resource token, the socket's own identity, or the
    /// permissions oracle.
    async fn may_view(&self, principal: &PrincipalId, resource_id: &str, token: Option<&str>) -> bool {
        if let Some(token) = token {
            if self.signer.verify(&[resource_id], token) {
                return true;
            }
        }
        if resource_id == principal.as_str() {
            return true;
        }
        let resource = ResourceRef::new("resource", resource_id);
        self.permissions
            .can_view(Some(principal), &resource)
            .await
            .unwrap_or(false)
    }
}
