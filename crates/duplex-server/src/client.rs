//! Client shell: dial a WebSocket endpoint and run a standalone connection.

use std::sync::Arc;

use duplex_core::{ConnectionId, ConnectionStatus};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::errors::ConnectionError;
use crate::handler::ConnectionHandler;
use crate::transport;

/// Dial `url` and start a connection with no hub.
///
/// The handler sees `Connected` once both pumps are running. Closing the
/// returned connection shuts it down in place.
pub async fn connect(
    url: &str,
    config: ConnectionConfig,
    handler: Arc<dyn ConnectionHandler>,
) -> Result<Arc<Connection>, ConnectionError> {
    let config = config.resolved();
    let ws_config = websocket_config(&config);
    debug!(url, "dialing");
    let (ws, _response) = tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false)
        .await
        .map_err(|e| ConnectionError::Connect(e.to_string()))?;

    let conn = Connection::new(ConnectionId::random(), config, handler, None);
    let (reader, writer) = transport::split_tungstenite(ws);
    let _pumps = conn.spawn_pumps(reader, writer)?;
    info!(url, conn_id = %conn.id(), "connected");
    conn.notify(ConnectionStatus::Connected);
    Ok(conn)
}

fn websocket_config(config: &ConnectionConfig) -> WebSocketConfig {
    let mut ws_config = WebSocketConfig::default();
    ws_config.read_buffer_size = config.read_buffer_size;
    ws_config.write_buffer_size = config.write_buffer_size;
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config
}
