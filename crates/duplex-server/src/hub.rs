//! The hub: single-owner registry of live connections.
//!
//! All mutation happens on the task running [`Hub::run`]. Callers submit
//! commands through a cloneable [`HubHandle`]; commands are processed one at a
//! time, so register, unregister, broadcast and unicast are atomic relative to
//! each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use duplex_core::{ConnectionId, ConnectionStatus};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connection::Connection;
use crate::errors::ConnectionError;
use crate::metrics::{BROADCASTS_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL};

enum HubCommand {
    Register(Arc<Connection>),
    Unregister(Arc<Connection>),
    Broadcast(Bytes),
    Send(ConnectionId, Bytes),
}

/// Cloneable handle for submitting commands to a running [`Hub`].
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
    count: Arc<AtomicUsize>,
}

impl HubHandle {
    /// Add a connection to the live set. Returns `false` if the hub stopped.
    pub fn register(&self, conn: Arc<Connection>) -> bool {
        self.tx.send(HubCommand::Register(conn)).is_ok()
    }

    /// Remove a connection and shut it down. Returns `false` if the hub
    /// stopped.
    pub fn unregister(&self, conn: Arc<Connection>) -> bool {
        self.tx.send(HubCommand::Unregister(conn)).is_ok()
    }

    /// Queue `payload` on every live connection.
    pub fn broadcast(&self, payload: impl Into<Bytes>) {
        if self.tx.send(HubCommand::Broadcast(payload.into())).is_err() {
            debug!("hub stopped, dropping broadcast");
        }
    }

    /// Serialize `value` and broadcast it.
    pub fn broadcast_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), ConnectionError> {
        let payload = serde_json::to_vec(value)?;
        self.broadcast(payload);
        Ok(())
    }

    /// Queue `payload` on the connection with `id`, if it is live.
    pub fn send(&self, id: ConnectionId, payload: impl Into<Bytes>) {
        if self.tx.send(HubCommand::Send(id, payload.into())).is_err() {
            debug!(conn_id = %id, "hub stopped, dropping message");
        }
    }

    /// Serialize `value` and send it to the connection with `id`.
    pub fn send_json<T: Serialize + ?Sized>(
        &self,
        id: ConnectionId,
        value: &T,
    ) -> Result<(), ConnectionError> {
        let payload = serde_json::to_vec(value)?;
        self.send(id, payload);
        Ok(())
    }

    /// Number of live connections as of the last processed command.
    pub fn connection_count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Whether the hub loop is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Registry of live connections, owned by its event loop.
pub struct Hub {
    rx: mpsc::UnboundedReceiver<HubCommand>,
    connections: HashMap<ConnectionId, Arc<Connection>>,
    count: Arc<AtomicUsize>,
}

impl Hub {
    /// Create a hub and the handle used to drive it.
    pub fn new() -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let count = Arc::new(AtomicUsize::new(0));
        let hub = Self {
            rx,
            connections: HashMap::new(),
            count: Arc::clone(&count),
        };
        (hub, HubHandle { tx, count })
    }

    /// Process commands until `cancel` fires, then shut down every
    /// connection still registered or still waiting in the command queue.
    ///
    /// Returns how many connections were shut down by the stop.
    #[instrument(name = "hub", skip_all)]
    pub async fn run(mut self, cancel: CancellationToken) -> usize {
        info!("hub started");
        loop {
            let command = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command);
        }

        self.rx.close();
        let mut stopped = 0;
        for (_, conn) in self.connections.drain() {
            record_removal();
            if !conn.is_closed() {
                stopped += 1;
            }
            conn.shutdown();
        }
        // Registrations and removals that never got their turn. A connection
        // whose close() is waiting here would otherwise stay half-closed.
        while let Ok(command) = self.rx.try_recv() {
            if let HubCommand::Register(conn) | HubCommand::Unregister(conn) = command {
                if !conn.is_closed() {
                    stopped += 1;
                }
                conn.shutdown();
            }
        }
        self.publish_count();
        info!(stopped, "hub stopped");
        stopped
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(conn) => self.register(conn),
            HubCommand::Unregister(conn) => self.unregister(&conn),
            HubCommand::Broadcast(payload) => {
                counter!(BROADCASTS_TOTAL).increment(1);
                let overflowed: Vec<_> = self
                    .connections
                    .values()
                    .filter(|conn| !conn.try_send(payload.clone()))
                    .cloned()
                    .collect();
                for conn in overflowed {
                    self.unregister(&conn);
                }
            }
            HubCommand::Send(id, payload) => {
                let overflowed = self
                    .connections
                    .get(&id)
                    .filter(|conn| !conn.try_send(payload))
                    .cloned();
                if let Some(conn) = overflowed {
                    self.unregister(&conn);
                }
            }
        }
        self.publish_count();
    }

    fn register(&mut self, conn: Arc<Connection>) {
        if let Some(existing) = self.connections.get(&conn.id()) {
            if Arc::ptr_eq(existing, &conn) {
                return;
            }
            warn!(conn_id = %conn.id(), "connection id collision, replacing previous connection");
            if let Some(previous) = self.connections.remove(&conn.id()) {
                record_removal();
                previous.shutdown();
            }
        }
        if conn.is_closed() {
            debug!(conn_id = %conn.id(), "ignoring registration of closed connection");
            return;
        }

        let _ = self.connections.insert(conn.id(), Arc::clone(&conn));
        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        debug!(conn_id = %conn.id(), "connection registered");
        conn.notify(ConnectionStatus::Connected);
    }

    /// Remove `conn` if it is the registered instance, then shut it down.
    ///
    /// A connection that is not (or no longer) in the map is still shut down,
    /// so every unregister converges to the terminal state.
    fn unregister(&mut self, conn: &Arc<Connection>) {
        let registered = self
            .connections
            .get(&conn.id())
            .is_some_and(|current| Arc::ptr_eq(current, conn));
        if registered {
            let _ = self.connections.remove(&conn.id());
            record_removal();
            debug!(conn_id = %conn.id(), "connection unregistered");
        }
        conn.shutdown();
    }

    fn publish_count(&self) {
        self.count.store(self.connections.len(), Ordering::Release);
    }
}

fn record_removal() {
    counter!(DISCONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::handler::testing::RecordingHandler;
    use crate::memory::{self, MemoryPeer, Written};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Fixture {
        handle: HubHandle,
        handler: Arc<RecordingHandler>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<usize>,
    }

    fn start_hub() -> Fixture {
        let (hub, handle) = Hub::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(hub.run(cancel.clone()));
        Fixture {
            handle,
            handler: Arc::new(RecordingHandler::default()),
            cancel,
            task,
        }
    }

    fn config(queue: usize) -> ConnectionConfig {
        ConnectionConfig {
            send_queue_capacity: queue,
            ..ConnectionConfig::default()
        }
    }

    impl Fixture {
        /// Registered connection with running pumps.
        fn live(&self) -> (Arc<Connection>, MemoryPeer) {
            let conn = Connection::new(
                ConnectionId::random(),
                config(16),
                self.handler.clone(),
                Some(self.handle.clone()),
            );
            let (reader, writer, peer) = memory::transport(16);
            let _pumps = conn.spawn_pumps(reader, writer).unwrap();
            assert!(self.handle.register(Arc::clone(&conn)));
            (conn, peer)
        }

        /// Registered connection whose queue is never drained.
        fn stalled(&self, id: ConnectionId, queue: usize) -> Arc<Connection> {
            let conn = Connection::new(id, config(queue), self.handler.clone(), Some(self.handle.clone()));
            assert!(self.handle.register(Arc::clone(&conn)));
            conn
        }

        async fn wait_for_count(&self, n: usize) {
            wait_until(|| self.handle.connection_count() == n).await;
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(TIMEOUT, async {
            while !cond() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    async fn next_message(peer: &mut MemoryPeer) -> Bytes {
        match tokio::time::timeout(TIMEOUT, peer.next_written()).await.unwrap() {
            Some(Written::Message(bytes)) => bytes,
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_notifies_connected() {
        let fx = start_hub();
        let (conn, _peer) = fx.live();
        fx.wait_for_count(1).await;
        assert_eq!(fx.handler.statuses_for(conn.id()), vec![ConnectionStatus::Connected]);
    }

    #[tokio::test]
    async fn broadcast_reaches_only_live_connections() {
        let fx = start_hub();
        let (a, mut peer_a) = fx.live();
        let (_b, mut peer_b) = fx.live();

        fx.handle.broadcast("x");
        assert_eq!(next_message(&mut peer_a).await, Bytes::from("x"));
        assert_eq!(next_message(&mut peer_b).await, Bytes::from("x"));

        assert!(fx.handle.unregister(Arc::clone(&a)));
        fx.handle.broadcast("y");
        assert_eq!(next_message(&mut peer_b).await, Bytes::from("y"));

        assert_eq!(peer_a.next_written().await, Some(Written::Close));
        assert_eq!(peer_a.next_written().await, None);
        assert_eq!(fx.handle.connection_count(), 1);
    }

    #[tokio::test]
    async fn overflow_disconnects_only_the_slow_connection() {
        let fx = start_hub();
        let slow = fx.stalled(ConnectionId::random(), 1);
        let (fast, mut peer_fast) = fx.live();

        fx.handle.broadcast("one");
        fx.handle.broadcast("two");
        wait_until(|| slow.is_closed()).await;

        assert_eq!(next_message(&mut peer_fast).await, Bytes::from("one"));
        assert_eq!(next_message(&mut peer_fast).await, Bytes::from("two"));
        assert!(!fast.is_closed());
        assert_eq!(
            fx.handler.statuses_for(slow.id()),
            vec![ConnectionStatus::Connected, ConnectionStatus::Disconnected]
        );
        fx.wait_for_count(1).await;
    }

    #[tokio::test]
    async fn unicast_targets_one_connection() {
        let fx = start_hub();
        let (a, mut peer_a) = fx.live();
        let (_b, mut peer_b) = fx.live();
        fx.wait_for_count(2).await;

        fx.handle.send(a.id(), "only a");
        fx.handle.send(ConnectionId::from_raw(u64::MAX >> 1), "nobody");
        fx.handle.broadcast("marker");

        assert_eq!(next_message(&mut peer_a).await, Bytes::from("only a"));
        assert_eq!(next_message(&mut peer_a).await, Bytes::from("marker"));
        assert_eq!(next_message(&mut peer_b).await, Bytes::from("marker"));
    }

    #[tokio::test]
    async fn unicast_overflow_disconnects() {
        let fx = start_hub();
        let conn = fx.stalled(ConnectionId::random(), 1);
        fx.handle.send(conn.id(), "fits");
        fx.handle.send(conn.id(), "overflows");
        wait_until(|| conn.is_closed()).await;
        fx.wait_for_count(0).await;
    }

    #[tokio::test]
    async fn id_collision_replaces_previous_connection() {
        let fx = start_hub();
        let id = ConnectionId::from_raw(7);
        let first = fx.stalled(id, 4);
        let second = fx.stalled(id, 4);

        wait_until(|| first.is_closed()).await;
        assert!(!second.is_closed());
        assert_eq!(fx.handle.connection_count(), 1);
        assert_eq!(
            fx.handler.statuses_for(id),
            vec![
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Connected,
            ]
        );
    }

    #[tokio::test]
    async fn close_goes_through_the_hub() {
        let fx = start_hub();
        let (conn, _peer) = fx.live();
        fx.wait_for_count(1).await;

        conn.close();
        conn.close();
        fx.wait_for_count(0).await;
        wait_until(|| conn.is_closed()).await;
        assert_eq!(fx.handler.status_count(ConnectionStatus::Disconnected), 1);
    }

    #[tokio::test]
    async fn stopping_the_hub_shuts_down_remaining_connections() {
        let fx = start_hub();
        let (a, _peer_a) = fx.live();
        let b = fx.stalled(ConnectionId::random(), 4);
        fx.wait_for_count(2).await;

        fx.cancel.cancel();
        assert_eq!(fx.task.await.unwrap(), 2);

        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(!fx.handle.is_running());
        assert_eq!(fx.handle.connection_count(), 0);
        assert_eq!(fx.handler.status_count(ConnectionStatus::Disconnected), 2);
    }

    #[tokio::test]
    async fn close_after_hub_stopped_shuts_down_locally() {
        let fx = start_hub();
        let conn = fx.stalled(ConnectionId::random(), 4);
        fx.wait_for_count(1).await;
        fx.cancel.cancel();
        fx.task.await.unwrap();

        let late = Connection::new(
            ConnectionId::random(),
            config(4),
            fx.handler.clone(),
            Some(fx.handle.clone()),
        );
        late.close();
        assert!(late.is_closed());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn stop_drains_queued_commands() {
        let (hub, handle) = Hub::new();
        let handler = Arc::new(RecordingHandler::default());
        let closing = Connection::new(
            ConnectionId::random(),
            config(4),
            handler.clone(),
            Some(handle.clone()),
        );
        let joining = Connection::new(
            ConnectionId::random(),
            config(4),
            handler.clone(),
            Some(handle.clone()),
        );
        assert!(handle.register(Arc::clone(&joining)));
        closing.close();
        assert!(!closing.is_closed());

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(hub.run(cancel).await, 2);

        assert!(closing.is_closed());
        assert!(joining.is_closed());
        assert_eq!(handler.statuses_for(closing.id()), vec![ConnectionStatus::Disconnected]);
        assert_eq!(handler.statuses_for(joining.id()), vec![ConnectionStatus::Disconnected]);

        closing.close();
        assert_eq!(handler.status_count(ConnectionStatus::Disconnected), 2);
    }

    #[test]
    fn json_helpers_report_serialization_errors() {
        let (_hub, handle) = Hub::new();
        let mut bad = std::collections::BTreeMap::new();
        let _ = bad.insert((1, 2), 3);
        assert!(handle.broadcast_json(&bad).is_err());
        assert!(handle.send_json(ConnectionId::from_raw(1), &bad).is_err());
        assert!(handle.broadcast_json(&serde_json::json!({"ok": true})).is_ok());
    }
}
