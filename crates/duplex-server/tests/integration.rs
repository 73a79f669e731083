//! End-to-end tests over a real listener and WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use duplex_core::{ConnectionStatus, CorrelationId, Envelope};
use duplex_server::{
    Connection, ConnectionConfig, ConnectionHandler, DefaultHandler, DuplexServer, ShutdownOutcome,
    client,
};
use duplex_settings::ServerSettings;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Echoes like the default handler and keeps every server-side connection.
#[derive(Default)]
struct TrackingHandler {
    live: Mutex<Vec<Arc<Connection>>>,
    statuses: Mutex<Vec<ConnectionStatus>>,
}

impl ConnectionHandler for TrackingHandler {
    fn on_message(&self, conn: &Arc<Connection>, payload: Bytes) {
        DefaultHandler.on_message(conn, payload);
    }

    fn on_status_changed(&self, conn: &Arc<Connection>, status: ConnectionStatus) {
        if status == ConnectionStatus::Connected {
            self.live.lock().push(Arc::clone(conn));
        }
        self.statuses.lock().push(status);
    }
}

impl TrackingHandler {
    fn count(&self, status: ConnectionStatus) -> usize {
        self.statuses.lock().iter().filter(|s| **s == status).count()
    }
}

async fn boot_server(
    handler: Arc<dyn ConnectionHandler>,
    config: ConnectionConfig,
) -> (String, Arc<DuplexServer>) {
    let settings = ServerSettings {
        port: 0,
        ..ServerSettings::default()
    };
    let server = Arc::new(DuplexServer::new(settings, config, handler));
    let addr = server.listen().await.unwrap();
    (format!("ws://{addr}/ws"), server)
}

async fn raw_client(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url)).await.unwrap().unwrap();
    ws
}

async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Binary(bytes) => return serde_json::from_slice(&bytes).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    timeout(TIMEOUT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn raw_client_request_is_echoed() {
    let (url, _server) = boot_server(Arc::new(DefaultHandler), ConnectionConfig::default()).await;
    let mut ws = raw_client(&url).await;

    ws.send(Message::text(r#"{"ReqId":12,"Data":{"hello":"world"},"Timeout":1000}"#))
        .await
        .unwrap();

    let reply = next_json(&mut ws).await;
    assert_eq!(reply, json!({"RespId": 12, "Data": {"hello": "world"}}));
}

#[tokio::test]
async fn client_request_round_trip() {
    let (url, _server) = boot_server(Arc::new(DefaultHandler), ConnectionConfig::default()).await;
    let conn = client::connect(&url, ConnectionConfig::default(), Arc::new(DefaultHandler))
        .await
        .unwrap();

    let reply = conn.request(json!("ping"), TIMEOUT).await.unwrap();
    assert_eq!(reply, json!("ping"));
    conn.close();
}

#[tokio::test]
async fn server_can_call_the_client() {
    let handler = Arc::new(TrackingHandler::default());
    let (url, _server) = boot_server(handler.clone(), ConnectionConfig::default()).await;
    let _client = client::connect(&url, ConnectionConfig::default(), Arc::new(DefaultHandler))
        .await
        .unwrap();

    wait_until(|| !handler.live.lock().is_empty()).await;
    let server_side = Arc::clone(&handler.live.lock()[0]);
    let reply = server_side.request(json!({"n": 42}), TIMEOUT).await.unwrap();
    assert_eq!(reply, json!({"n": 42}));
}

#[tokio::test]
async fn broadcast_reaches_every_client_and_health_counts_them() {
    let handler = Arc::new(TrackingHandler::default());
    let (url, server) = boot_server(handler.clone(), ConnectionConfig::default()).await;
    let mut a = raw_client(&url).await;
    let mut b = raw_client(&url).await;
    wait_until(|| server.hub().connection_count() == 2).await;

    server.hub().broadcast_json(&json!({"event": "x"})).unwrap();
    assert_eq!(next_json(&mut a).await, json!({"event": "x"}));
    assert_eq!(next_json(&mut b).await, json!({"event": "x"}));

    let addr = url.trim_start_matches("ws://").trim_end_matches("/ws");
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    let _ = timeout(TIMEOUT, stream.read_to_string(&mut response)).await.unwrap().unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#""connections":2"#));
}

#[tokio::test]
async fn unicast_reaches_one_client() {
    let handler = Arc::new(TrackingHandler::default());
    let (url, server) = boot_server(handler.clone(), ConnectionConfig::default()).await;
    let mut ws = raw_client(&url).await;
    wait_until(|| !handler.live.lock().is_empty()).await;

    let id = handler.live.lock()[0].id();
    server.hub().send_json(id, &json!("just you")).unwrap();
    assert_eq!(next_json(&mut ws).await, json!("just you"));
}

#[tokio::test]
async fn client_disconnect_is_reported_once() {
    let handler = Arc::new(TrackingHandler::default());
    let (url, server) = boot_server(handler.clone(), ConnectionConfig::default()).await;
    let ws = raw_client(&url).await;
    wait_until(|| server.hub().connection_count() == 1).await;

    drop(ws);
    wait_until(|| server.hub().connection_count() == 0).await;
    wait_until(|| handler.count(ConnectionStatus::Disconnected) == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.count(ConnectionStatus::Disconnected), 1);
}

#[tokio::test]
async fn oversize_message_closes_the_connection() {
    let config = ConnectionConfig {
        max_message_size: 64,
        ..ConnectionConfig::default()
    };
    let handler = Arc::new(TrackingHandler::default());
    let (url, server) = boot_server(handler.clone(), config).await;
    let mut ws = raw_client(&url).await;
    wait_until(|| server.hub().connection_count() == 1).await;

    let big = format!(r#"{{"pad":"{}"}}"#, "x".repeat(256));
    let _ = ws.send(Message::text(big)).await;

    wait_until(|| server.hub().connection_count() == 0).await;
    assert_eq!(handler.count(ConnectionStatus::Disconnected), 1);
}

#[tokio::test]
async fn shutdown_closes_clients() {
    let (url, server) = boot_server(Arc::new(DefaultHandler), ConnectionConfig::default()).await;
    let conn = client::connect(&url, ConnectionConfig::default(), Arc::new(DefaultHandler))
        .await
        .unwrap();
    wait_until(|| server.hub().connection_count() == 1).await;

    let outcome = server.shutdown().graceful_shutdown(TIMEOUT).await;
    assert_eq!(outcome, ShutdownOutcome::Drained { force_closed: 1 });
    timeout(TIMEOUT, conn.closed()).await.unwrap();
    assert!(!server.hub().is_running());
}

#[tokio::test]
async fn pending_client_request_fails_when_server_goes_away() {
    // The server never answers plain requests with this handler.
    struct Silent;
    impl ConnectionHandler for Silent {
        fn on_message(&self, _conn: &Arc<Connection>, _payload: Bytes) {}
        fn on_status_changed(&self, _conn: &Arc<Connection>, _status: ConnectionStatus) {}
    }

    let (url, server) = boot_server(Arc::new(Silent), ConnectionConfig::default()).await;
    let conn = client::connect(&url, ConnectionConfig::default(), Arc::new(DefaultHandler))
        .await
        .unwrap();
    wait_until(|| server.hub().connection_count() == 1).await;

    let call = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move { conn.request(json!("hello?"), Duration::from_secs(30)).await })
    };
    wait_until(|| conn.router().pending_count() == 1).await;
    server.shutdown().shutdown();

    let result = timeout(TIMEOUT, call).await.unwrap().unwrap();
    assert!(result.is_err());
}

#[test]
fn envelope_ids_round_trip_through_json() {
    let bytes = Envelope::reply(CorrelationId::from_raw(9), json!([1, 2])).to_vec().unwrap();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value, json!({"RespId": 9, "Data": [1, 2]}));
}
