//! A single duplex connection.
//!
//! A [`Connection`] owns a bounded outbound queue and one correlation router,
//! and runs two pumps over a split transport:
//!
//! - the **inbound pump** reads frames, enforces the liveness window and the
//!   message size limit, and hands data to [`ConnectionHandler::on_message`];
//! - the **outbound pump** drains the queue, writes liveness probes, and
//!   writes a close frame once the connection shuts down.
//!
//! Teardown converges on [`Connection::shutdown`], which runs at most once:
//! fire the closed signal, notify `Disconnected`, close the outbound queue,
//! shut the router down.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use duplex_core::{ConnectionId, ConnectionStatus, CorrelationId, Envelope};
use duplex_router::{Router, RouterError, ShutdownReason};
use metrics::counter;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ConnectionConfig;
use crate::errors::{ConnectionError, TransportError};
use crate::handler::ConnectionHandler;
use crate::hub::HubHandle;
use crate::metrics::QUEUE_OVERFLOWS_TOTAL;
use crate::transport::{BoxReader, BoxWriter, Frame};

/// One live duplex connection.
pub struct Connection {
    id: ConnectionId,
    config: ConnectionConfig,
    handler: Arc<dyn ConnectionHandler>,
    hub: Option<HubHandle>,
    /// Producer side of the outbound queue; taken on shutdown.
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    /// Consumer side, handed to the outbound pump on start.
    rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    closed: CancellationToken,
    closing: AtomicBool,
    shut_down: AtomicBool,
    router: Router<Value>,
    tag: AtomicI64,
    properties: Mutex<HashMap<String, Value>>,
}

impl Connection {
    /// Create a connection. Pumps are not running until
    /// [`Connection::spawn_pumps`] is called.
    ///
    /// `hub` is `Some` for server-side connections; closing such a connection
    /// goes through the hub so it leaves the live set. Zero fields in
    /// `config` are replaced by their defaults.
    pub fn new(
        id: ConnectionId,
        config: ConnectionConfig,
        handler: Arc<dyn ConnectionHandler>,
        hub: Option<HubHandle>,
    ) -> Arc<Self> {
        let config = config.resolved();
        let (tx, rx) = mpsc::channel(config.send_queue_capacity);
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let router = Router::<Value>::new(move |cid, data, timeout| {
                let conn = weak
                    .upgrade()
                    .ok_or_else(|| RouterError::Send("connection dropped".into()))?;
                conn.send_request(cid, data, timeout)
            });
            Self {
                id,
                config,
                handler,
                hub,
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(Some(rx)),
                closed: CancellationToken::new(),
                closing: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                router,
                tag: AtomicI64::new(0),
                properties: Mutex::new(HashMap::new()),
            }
        })
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Resolved configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Owning hub, `None` for client connections.
    pub fn hub(&self) -> Option<&HubHandle> {
        self.hub.as_ref()
    }

    /// The connection's correlation router.
    pub fn router(&self) -> &Router<Value> {
        &self.router
    }

    // ── Sending ─────────────────────────────────────────────────────────

    /// Enqueue `payload` if the connection is open and the queue has room.
    pub fn try_send(&self, payload: Bytes) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %self.id, "outbound queue overflow");
                counter!(QUEUE_OVERFLOWS_TOTAL).increment(1);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue `payload`, force-closing the connection if that fails.
    pub fn send(self: &Arc<Self>, payload: Bytes) -> bool {
        if self.try_send(payload) {
            true
        } else {
            self.close();
            false
        }
    }

    /// Serialize `value` as JSON and [`send`](Connection::send) it.
    ///
    /// Serialization errors never reach the queue.
    pub fn send_json<T: Serialize + ?Sized>(self: &Arc<Self>, value: &T) -> Result<(), ConnectionError> {
        let payload = serde_json::to_vec(value)?;
        if self.send(Bytes::from(payload)) {
            Ok(())
        } else {
            Err(ConnectionError::Closed)
        }
    }

    /// Send a correlated request and wait for the peer's reply.
    pub async fn request(&self, data: Value, timeout: Duration) -> Result<Value, ConnectionError> {
        Ok(self.router.send_message(data, timeout).await?)
    }

    fn send_request(
        self: &Arc<Self>,
        id: CorrelationId,
        data: Value,
        timeout: Duration,
    ) -> Result<(), RouterError> {
        let payload = Envelope::request(id, data, timeout)
            .to_vec()
            .map_err(|e| RouterError::Send(e.to_string()))?;
        if self.send(Bytes::from(payload)) {
            Ok(())
        } else {
            Err(RouterError::Send("connection closed".into()))
        }
    }

    // ── Receiving ───────────────────────────────────────────────────────

    /// Decode an inbound payload.
    ///
    /// Replies are routed into this connection's router as a side effect.
    pub fn interpret(self: &Arc<Self>, payload: &[u8]) -> Result<Incoming, ConnectionError> {
        Ok(match Envelope::decode(payload)? {
            Envelope::Request { id, data, timeout } => Incoming::Request {
                data,
                timeout,
                responder: Responder {
                    conn: Arc::clone(self),
                    id,
                },
            },
            Envelope::Reply { id, data } => Incoming::Reply {
                delivered: self.router.process_incoming(id, data),
            },
            Envelope::Plain(data) => Incoming::Message(data),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Close the connection. Idempotent.
    ///
    /// Pending requests fail with [`ShutdownReason::ManualClose`]. A
    /// hub-owned connection is handed to its hub for removal; otherwise it
    /// shuts down in place.
    pub fn close(self: &Arc<Self>) {
        if self.closed.is_cancelled() || self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(conn_id = %self.id, "closing connection");
        self.router.shutdown(ShutdownReason::ManualClose);

        let handed_off = self
            .hub
            .as_ref()
            .is_some_and(|hub| hub.unregister(Arc::clone(self)));
        if !handed_off {
            self.shutdown();
        }
    }

    /// Whether the closed signal has fired.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the closed signal fires.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Terminal teardown. Runs at most once however many paths reach it.
    pub(crate) fn shutdown(self: &Arc<Self>) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed.cancel();
        self.notify(ConnectionStatus::Disconnected);
        drop(self.tx.lock().take());
        self.router.shutdown(ShutdownReason::Disconnected);
    }

    pub(crate) fn notify(self: &Arc<Self>, status: ConnectionStatus) {
        self.handler.on_status_changed(self, status);
    }

    // ── User storage ────────────────────────────────────────────────────

    /// User tag.
    pub fn tag(&self) -> i64 {
        self.tag.load(Ordering::Acquire)
    }

    /// Replace the user tag.
    pub fn set_tag(&self, tag: i64) {
        self.tag.store(tag, Ordering::Release);
    }

    /// Lock the user property map.
    ///
    /// Each access is synchronized; sequences of accesses are not.
    pub fn properties(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.properties.lock()
    }

    // ── Pumps ───────────────────────────────────────────────────────────

    /// Start the inbound and outbound pumps over a split transport.
    pub fn spawn_pumps(
        self: &Arc<Self>,
        reader: BoxReader,
        writer: BoxWriter,
    ) -> Result<Pumps, ConnectionError> {
        let rx = self.rx.lock().take().ok_or(ConnectionError::AlreadyStarted)?;
        let write = tokio::spawn(Arc::clone(self).write_pump(rx, writer));
        let read = tokio::spawn(Arc::clone(self).read_pump(reader));
        Ok(Pumps { read, write })
    }

    #[instrument(name = "read_pump", skip_all, fields(conn_id = %self.id))]
    async fn read_pump(self: Arc<Self>, mut reader: BoxReader) {
        let window = self.config.liveness_window;
        let mut deadline = Instant::now() + window;

        loop {
            let next = tokio::select! {
                () = self.closed.cancelled() => break,
                next = tokio::time::timeout_at(deadline, reader.read_frame()) => next,
            };
            match next {
                Err(_) => {
                    info!(?window, "peer silent for the liveness window");
                    break;
                }
                Ok(Err(err)) => {
                    debug!(error = %err, "read failed");
                    break;
                }
                Ok(Ok(Frame::Close)) => {
                    debug!("peer closed");
                    break;
                }
                Ok(Ok(Frame::Probe)) => deadline = Instant::now() + window,
                Ok(Ok(Frame::Data(payload))) => {
                    if payload.len() > self.config.max_message_size {
                        warn!(
                            size = payload.len(),
                            limit = self.config.max_message_size,
                            "inbound message too large"
                        );
                        break;
                    }
                    self.handler.on_message(&self, payload);
                }
            }
        }

        drop(reader);
        self.close();
        self.router.shutdown(ShutdownReason::Generic);
    }

    #[instrument(name = "write_pump", skip_all, fields(conn_id = %self.id))]
    async fn write_pump(self: Arc<Self>, mut rx: mpsc::Receiver<Bytes>, mut writer: BoxWriter) {
        let period = self.config.probe_period;
        let mut probe = tokio::time::interval_at(Instant::now() + period, period);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                () = self.closed.cancelled() => break self.timed(writer.write_close()).await,
                next = rx.recv() => match next {
                    Some(payload) => {
                        if let Err(err) = self.timed(writer.write_message(payload)).await {
                            break Err(err);
                        }
                    }
                    None => break self.timed(writer.write_close()).await,
                },
                _ = probe.tick() => {
                    if let Err(err) = self.timed(writer.write_probe()).await {
                        break Err(err);
                    }
                }
            }
        };
        drop(rx);

        if let Err(err) = result {
            debug!(error = %err, "write failed");
            self.close();
        }
        if let Err(err) = writer.close().await {
            debug!(error = %err, "transport close failed");
        }
    }

    async fn timed<F>(&self, write: F) -> Result<(), TransportError>
    where
        F: Future<Output = Result<(), TransportError>>,
    {
        tokio::time::timeout(self.config.write_timeout, write)
            .await
            .unwrap_or(Err(TransportError::Timeout))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("hub", &self.hub.is_some())
            .finish_non_exhaustive()
    }
}

/// Join handles of a connection's two pumps.
#[derive(Debug)]
pub struct Pumps {
    read: JoinHandle<()>,
    write: JoinHandle<()>,
}

impl Pumps {
    /// Wait for both pumps to finish.
    pub async fn join(self) {
        let (read, write) = tokio::join!(self.read, self.write);
        for result in [read, write] {
            if let Err(err) = result {
                warn!(error = %err, "connection pump panicked");
            }
        }
    }
}

/// A decoded inbound payload.
#[derive(Debug)]
pub enum Incoming {
    /// The peer expects one reply through `responder`.
    Request {
        /// Request payload.
        data: Value,
        /// How long the peer is willing to wait.
        timeout: Duration,
        /// Sends the reply.
        responder: Responder,
    },
    /// A reply to one of our requests; `delivered` is `false` when nobody was
    /// waiting for it any more.
    Reply {
        /// Whether a pending request received the reply.
        delivered: bool,
    },
    /// Uncorrelated message.
    Message(Value),
}

/// Answers one inbound request.
#[derive(Clone)]
pub struct Responder {
    conn: Arc<Connection>,
    id: CorrelationId,
}

impl Responder {
    /// Correlation id of the request being answered.
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Send `data` back to the requester.
    pub fn reply(&self, data: Value) -> Result<(), ConnectionError> {
        let payload = Envelope::reply(self.id, data).to_vec()?;
        if self.conn.send(Bytes::from(payload)) {
            Ok(())
        } else {
            Err(ConnectionError::Closed)
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("conn_id", &self.conn.id)
            .field("id", &self.id)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
