//! The accept fan-out worker.
//!
//! Accepts are announced on the `invitation-accept` queue so every node can
//! run its resource-type listeners, not just the node that handled the
//! accept. The worker re-emits [`InvitationEvent::Accepted`] locally for
//! each task. Delivery is at-least-once: listeners must be idempotent
//! (member updates already are, since the roles were granted before the task
//! was enqueued).

use crate::events::InvitationEvent;
use crate::service::{AcceptFanOut, fan_out_event};
use collegium_core::emitter::Emitter;
use collegium_core::queue::TaskQueue;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Start consuming accept fan-out tasks.
///
/// Returns the worker task; abort it to stop consuming.
pub fn spawn_accept_worker(
    queue: Arc<dyn TaskQueue>,
    emitter: Arc<Emitter<InvitationEvent>>,
    prefetch: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stream = queue.subscribe(crate::INVITATION_ACCEPT_QUEUE, prefetch).await;
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(%error, "accept fan-out subscription failed");
                return;
            }
        };

        while let Some(next) = stream.next().await {
            let task = match next {
                Ok(task) => task,
                Err(error) => {
                    tracing::warn!(%error, "accept fan-out stream error");
                    continue;
                }
            };
            let fan_out: AcceptFanOut = match task.payload() {
                Ok(fan_out) => fan_out,
                Err(error) => {
                    tracing::warn!(%error, "malformed accept fan-out task");
                    continue;
                }
            };
            let errors = emitter.emit(fan_out_event(fan_out)).await;
            for error in errors {
                tracing::warn!(%error, "accept fan-out listener failed");
            }
        }
        tracing::debug!("accept fan-out worker stopped");
    })
}
