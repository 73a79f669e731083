//! Server shutdown.
//!
//! One token stops both the listener and the hub loop. The coordinator also
//! holds the task serving them, so a caller can wait for the hub to finish
//! tearing down the connections that were still live.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::graceful_shutdown`] callers usually wait.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How a graceful shutdown ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Listener and hub stopped. `force_closed` connections were still live
    /// when the hub stopped and were shut down by it.
    Drained {
        /// Connections shut down by the hub stop.
        force_closed: usize,
    },
    /// The deadline passed before the server task finished.
    TimedOut,
    /// No server task was running.
    NotServing,
}

/// Owns the shutdown token and the server tasks it stops.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<usize>>>,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal the listener and hub to stop without waiting for them.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Track a server task. Its output is the number of connections the hub
    /// shut down when it stopped.
    pub(crate) fn track(&self, task: JoinHandle<usize>) {
        self.tasks.lock().push(task);
    }

    /// Signal shutdown, then wait up to `timeout` for every tracked server
    /// task to finish.
    pub async fn graceful_shutdown(&self, timeout: Duration) -> ShutdownOutcome {
        self.shutdown();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return ShutdownOutcome::NotServing;
        }

        match tokio::time::timeout(timeout, futures::future::join_all(tasks)).await {
            Ok(results) => {
                let force_closed = results
                    .into_iter()
                    .map(|result| {
                        result.unwrap_or_else(|err| {
                            warn!(error = %err, "server task failed");
                            0
                        })
                    })
                    .sum();
                info!(force_closed, "server drained");
                ShutdownOutcome::Drained { force_closed }
            }
            Err(_) => {
                warn!(?timeout, "server did not stop before the deadline");
                ShutdownOutcome::TimedOut
            }
        }
    }
}
