//! Typed in-process publish/subscribe with two handler kinds.
//!
//! Domain code announces facts through an [`Emitter`] rather than calling
//! downstream modules directly. Two handler kinds exist:
//!
//! - `on` handlers are fire-and-forget observers, invoked synchronously in
//!   registration order with no back-channel.
//! - `when` handlers are awaitable: [`Emitter::emit`] completes only after
//!   every `when` handler has completed, and returns their aggregated errors.
//!
//! Handler lists are read-mostly: they are populated during startup wiring
//! and never mutated afterwards. A `when` handler's error is captured, never
//! propagated by panic, and already-committed side effects of other handlers
//! are not unwound.
//!
//! # Example
//!
//! ```
//! use collegium_core::emitter::Emitter;
//! use collegium_core::Error;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! #[derive(Clone, Debug)]
//! struct Created { id: String }
//!
//! let emitter = Arc::new(Emitter::<Created>::new("demo"));
//! emitter.on(|ev| tracing::debug!(id = %ev.id, "created"));
//! emitter.when(|ev: Created| Box::pin(async move {
//!     if ev.id.is_empty() {
//!         return Err(Error::validation("empty id"));
//!     }
//!     Ok(())
//! }));
//!
//! let errors = emitter.emit(Created { id: "x".into() }).await;
//! assert!(errors.is_empty());
//! # }
//! ```

use crate::error::Error;
use futures::future::{BoxFuture, join_all};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A fire-and-forget observer.
type OnHandler<E> = Box<dyn Fn(&E) + Send + Sync>;

/// An awaitable handler whose completion gates `emit`.
type WhenHandler<E> = Box<dyn Fn(E) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// In-process fan-out of one event type.
///
/// One emitter per domain event enum; emitters are per-process singletons
/// created at startup and shared as `Arc<Emitter<E>>`.
pub struct Emitter<E> {
    /// Name used in log lines, e.g. `"messagebox"`.
    name: &'static str,
    on_handlers: RwLock<Vec<OnHandler<E>>>,
    when_handlers: RwLock<Vec<WhenHandler<E>>>,
}

impl<E> Emitter<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Create an emitter with no handlers.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            on_handlers: RwLock::const_new(Vec::new()),
            when_handlers: RwLock::const_new(Vec::new()),
        }
    }

    /// Register a fire-and-forget handler.
    ///
    /// Handlers run synchronously inside [`Emitter::emit`], in registration
    /// order, with no back-channel. Registration happens during startup
    /// wiring only.
    pub fn on<F>(&self, handler: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        // Startup-only mutation; blocking_write would panic inside a runtime
        // worker, so take the async lock opportunistically.
        let mut guard = match self.on_handlers.try_write() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::error!(emitter = self.name, "on-handler registered during emit; dropped");
                return;
            }
        };
        guard.push(Box::new(handler));
    }

    /// Register an awaitable handler.
    ///
    /// All `when` handlers are awaited by [`Emitter::emit`]; they may
    /// complete in any order. An error return is collected, not thrown.
    pub fn when<F>(&self, handler: F)
    where
        F: Fn(E) -> BoxFuture<'static, Result<(), Error>> + Send + Sync + 'static,
    {
        let mut guard = match self.when_handlers.try_write() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::error!(emitter = self.name, "when-handler registered during emit; dropped");
                return;
            }
        };
        guard.push(Box::new(handler));
    }

    /// Emit an event to every handler.
    ///
    /// Invokes all `on` handlers synchronously in registration order, then
    /// awaits all `when` handlers concurrently. Returns the aggregated list
    /// of `when` handler errors; an empty vec means every handler completed
    /// cleanly. Ordering between `on` and `when` handlers is unspecified
    /// beyond this: the return value observes completion of all `when`.
    pub async fn emit(&self, event: E) -> Vec<Error> {
        {
            let on = self.on_handlers.read().await;
            for handler in on.iter() {
                handler(&event);
            }
        }

        let futures: Vec<BoxFuture<'static, Result<(), Error>>> = {
            let when = self.when_handlers.read().await;
            when.iter().map(|handler| handler(event.clone())).collect()
        };

        let errors: Vec<Error> = join_all(futures)
            .await
            .into_iter()
            .filter_map(std::result::Result::err)
            .collect();

        if !errors.is_empty() {
            tracing::warn!(
                emitter = self.name,
                error_count = errors.len(),
                "when-handlers reported errors"
            );
        }
        errors
    }

    /// Emit without observing completion.
    ///
    /// The equivalent of calling emit with no continuation: the work still
    /// runs to completion on the runtime, errors are logged and dropped.
    pub fn emit_detached(self: &Arc<Self>, event: E) {
        let emitter = Arc::clone(self);
        tokio::spawn(async move {
            let errors = emitter.emit(event).await;
            for error in errors {
                tracing::warn!(emitter = emitter.name, %error, "detached emit handler failed");
            }
        });
    }

    /// Number of registered handlers, `(on, when)`. Startup wiring sanity
    /// checks only.
    pub async fn handler_counts(&self) -> (usize, usize) {
        (
            self.on_handlers.read().await.len(),
            self.when_handlers.read().await.len(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug)]
    struct Ping(u32);

    #[tokio::test]
    async fn on_handlers_run_in_registration_order() {
        let emitter = Emitter::<Ping>::new("test");
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        for tag in 0..3u32 {
            let seen = Arc::clone(&seen);
            emitter.on(move |_| seen.lock().expect("lock").push(tag));
        }

        let errors = emitter.emit(Ping(1)).await;
        assert!(errors.is_empty());
        assert_eq!(*seen.lock().expect("lock"), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn emit_awaits_all_when_handlers() {
        let emitter = Emitter::<Ping>::new("test");
        let completed = Arc::new(AtomicUsize::new(0));

        for delay_ms in [5u64, 1, 3] {
            let completed = Arc::clone(&completed);
            emitter.when(move |_ev: Ping| {
                let completed = Arc::clone(&completed);
                Box::pin(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            });
        }

        let errors = emitter.emit(Ping(7)).await;
        assert!(errors.is_empty());
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn when_errors_are_aggregated_not_thrown() {
        let emitter = Emitter::<Ping>::new("test");
        emitter.when(|_ev: Ping| Box::pin(async { Err(Error::internal("first")) }));
        emitter.when(|_ev: Ping| Box::pin(async { Ok(()) }));
        emitter.when(|_ev: Ping| Box::pin(async { Err(Error::validation("second")) }));

        let errors = emitter.emit(Ping(0)).await;
        assert_eq!(errors.len(), 2);
    }

    #[tokio::test]
    async fn detached_emit_still_runs_handlers() {
        let emitter = Arc::new(Emitter::<Ping>::new("test"));
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));

        emitter.when(move |ev: Ping| {
            let tx = Arc::clone(&tx);
            Box::pin(async move {
                if let Some(tx) = tx.lock().expect("lock").take() {
                    let _ = tx.send(ev.0);
                }
                Ok(())
            })
        });

        emitter.emit_detached(Ping(42));
        let got = tokio::time::timeout(std::time::Duration::from_secs(1), rx)
            .await
            .expect("handler should run")
            .expect("channel open");
        assert_eq!(got, 42);
    }
}
