//! Application callbacks for connection events.

use std::sync::Arc;

use bytes::Bytes;
use duplex_core::ConnectionStatus;
use tracing::{debug, info, warn};

use crate::connection::{Connection, Incoming};

/// Receives inbound payloads and lifecycle transitions of connections.
///
/// Both callbacks run on connection or hub tasks and must not block.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Called on the inbound pump for every data message, in arrival order.
    fn on_message(&self, conn: &Arc<Connection>, payload: Bytes);

    /// Called once per transition: `Connected` when the connection goes live,
    /// `Disconnected` when it is torn down.
    fn on_status_changed(&self, conn: &Arc<Connection>, status: ConnectionStatus);
}

/// Handler used when the application supplies none.
///
/// Echoes synchronous requests back to the caller, routes replies into the
/// connection's router, and logs everything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

impl ConnectionHandler for DefaultHandler {
    fn on_message(&self, conn: &Arc<Connection>, payload: Bytes) {
        match conn.interpret(&payload) {
            Ok(Incoming::Request {
                data, responder, ..
            }) => {
                if let Err(err) = responder.reply(data) {
                    warn!(conn_id = %conn.id(), error = %err, "failed to echo request");
                }
            }
            Ok(Incoming::Reply { delivered }) => {
                debug!(conn_id = %conn.id(), delivered, "received reply");
            }
            Ok(Incoming::Message(data)) => {
                info!(conn_id = %conn.id(), %data, "received message");
            }
            Err(err) => {
                info!(
                    conn_id = %conn.id(),
                    error = %err,
                    raw = %String::from_utf8_lossy(&payload),
                    "received non-JSON message"
                );
            }
        }
    }

    fn on_status_changed(&self, conn: &Arc<Connection>, status: ConnectionStatus) {
        info!(conn_id = %conn.id(), %status, "status changed");
    }
}
