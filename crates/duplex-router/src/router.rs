//! The correlation router.
//!
//! Each pending call owns a single-slot waiter keyed by its correlation id.
//! The waiter is removed on every exit path: reply, timeout, shutdown, send
//! failure, or the caller dropping the future.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use duplex_core::CorrelationId;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{RouterError, ShutdownReason};

/// Pushes one request `(id, data, timeout)` onto the underlying channel.
pub type SendFn<T> =
    Box<dyn Fn(CorrelationId, T, Duration) -> Result<(), RouterError> + Send + Sync>;

/// Receives incoming messages whose correlation id has no pending waiter.
pub type UnknownHandler<T> = Arc<dyn Fn(CorrelationId, T) + Send + Sync>;

struct Pending<T> {
    next_id: CorrelationId,
    waiters: HashMap<CorrelationId, oneshot::Sender<T>>,
    closed: bool,
}

/// Maps outgoing synchronous requests to their replies.
pub struct Router<T> {
    send: SendFn<T>,
    pending: Mutex<Pending<T>>,
    reason: OnceLock<ShutdownReason>,
    shutdown: CancellationToken,
    unknown: Option<UnknownHandler<T>>,
}

impl<T: Send + 'static> Router<T> {
    /// Create a router around a send function.
    ///
    /// The correlation counter starts at a random offset.
    pub fn new<F>(send: F) -> Self
    where
        F: Fn(CorrelationId, T, Duration) -> Result<(), RouterError> + Send + Sync + 'static,
    {
        Self {
            send: Box::new(send),
            pending: Mutex::new(Pending {
                next_id: CorrelationId::random_offset(),
                waiters: HashMap::new(),
                closed: false,
            }),
            reason: OnceLock::new(),
            shutdown: CancellationToken::new(),
            unknown: None,
        }
    }

    /// Install a handler for replies nobody is waiting for.
    #[must_use]
    pub fn with_unknown_handler(mut self, handler: UnknownHandler<T>) -> Self {
        self.unknown = Some(handler);
        self
    }

    /// Issue a request and wait for the matching reply.
    ///
    /// Fails immediately with the latched reason if the router is already shut
    /// down; the send function is not called in that case.
    pub async fn send_message(&self, data: T, timeout: Duration) -> Result<T, RouterError> {
        let (id, rx) = self.register()?;
        let _guard = PendingGuard { router: self, id };

        (self.send)(id, data, timeout)?;

        tokio::select! {
            biased;
            reply = rx => reply.map_err(|_| self.shutdown_error()),
            () = self.shutdown.cancelled() => Err(self.shutdown_error()),
            () = tokio::time::sleep(timeout) => {
                debug!(correlation_id = %id, ?timeout, "request timed out");
                Err(RouterError::Timeout)
            }
        }
    }

    /// Route an incoming reply to its waiter.
    ///
    /// Returns `true` if a pending call received it. Otherwise the message is
    /// handed to the unknown-message handler (on a separate task when a runtime
    /// is available) and `false` is returned.
    pub fn process_incoming(&self, id: CorrelationId, data: T) -> bool {
        let waiter = self.pending.lock().waiters.remove(&id);
        let data = match waiter {
            Some(tx) => match tx.send(data) {
                Ok(()) => return true,
                // Caller went away between removal and delivery.
                Err(data) => data,
            },
            None => data,
        };

        match &self.unknown {
            Some(handler) => {
                let handler = Arc::clone(handler);
                if let Ok(rt) = tokio::runtime::Handle::try_current() {
                    drop(rt.spawn(async move { handler(id, data) }));
                } else {
                    handler(id, data);
                }
            }
            None => debug!(correlation_id = %id, "dropping unsolicited reply"),
        }
        false
    }

    /// Shut the router down, releasing every blocked caller.
    ///
    /// Only the first call has an effect; its reason is latched.
    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.reason.set(reason).is_err() {
            return;
        }
        let released = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            let released = pending.waiters.len();
            pending.waiters.clear();
            released
        };
        if released > 0 {
            debug!(released, reason = %self.shutdown_error(), "router shut down with pending calls");
        }
        self.shutdown.cancel();
    }

    /// Whether [`Router::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.reason.get().is_some()
    }

    /// The latched shutdown reason, if any.
    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.reason.get().cloned()
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().waiters.len()
    }

    fn register(&self) -> Result<(CorrelationId, oneshot::Receiver<T>), RouterError> {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Err(self.shutdown_error());
        }

        let mut id = pending.next_id;
        while pending.waiters.contains_key(&id) {
            warn!(correlation_id = %id, "correlation id still pending, skipping");
            id = id.next();
        }
        pending.next_id = id.next();

        let (tx, rx) = oneshot::channel();
        let _ = pending.waiters.insert(id, tx);
        Ok((id, rx))
    }

    fn shutdown_error(&self) -> RouterError {
        RouterError::Shutdown(self.reason.get().cloned().unwrap_or_default())
    }
}

struct PendingGuard<'a, T> {
    router: &'a Router<T>,
    id: CorrelationId,
}

impl<T> Drop for PendingGuard<'_, T> {
    fn drop(&mut self) {
        let _ = self.router.pending.lock().waiters.remove(&self.id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
