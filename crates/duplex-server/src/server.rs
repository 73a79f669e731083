//! `DuplexServer`: axum HTTP + WebSocket shell around a [`Hub`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::response::{Json, Response};
use axum::routing::get;
use duplex_core::ConnectionId;
use duplex_settings::{DuplexSettings, ServerSettings};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::handler::ConnectionHandler;
use crate::health::{self, HealthResponse};
use crate::hub::{Hub, HubHandle};
use crate::shutdown::ShutdownCoordinator;
use crate::transport;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hub owning the live connections.
    pub hub: HubHandle,
    /// Configuration for every accepted connection.
    pub config: ConnectionConfig,
    /// Callbacks for every accepted connection.
    pub handler: Arc<dyn ConnectionHandler>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when metrics are enabled.
    pub metrics: Option<PrometheusHandle>,
    /// Shutdown state, reported by `/health`.
    pub shutdown: Arc<ShutdownCoordinator>,
}

/// WebSocket server with a hub of live connections.
pub struct DuplexServer {
    settings: ServerSettings,
    config: ConnectionConfig,
    handler: Arc<dyn ConnectionHandler>,
    hub: HubHandle,
    /// Hub loop, taken when the server starts.
    idle_hub: Mutex<Option<Hub>>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl DuplexServer {
    /// Create a server. Nothing runs until [`DuplexServer::listen`].
    pub fn new(
        settings: ServerSettings,
        config: ConnectionConfig,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Self {
        let (hub, handle) = Hub::new();
        Self {
            settings,
            config: config.resolved(),
            handler,
            hub: handle,
            idle_hub: Mutex::new(Some(hub)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Create a server from loaded settings.
    pub fn from_settings(settings: &DuplexSettings, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self::new(
            settings.server.clone(),
            ConnectionConfig::from(&settings.connection),
            handler,
        )
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            config: self.config.clone(),
            handler: Arc::clone(&self.handler),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            shutdown: Arc::clone(&self.shutdown),
        };

        let mut router = Router::new()
            .route(&ws_route(&self.settings.ws_path), get(ws_handler))
            .route("/health", get(health_handler));
        if self.metrics.is_some() {
            router = router.route("/metrics", get(metrics_handler));
        }
        router.with_state(state)
    }

    /// Spawn the hub loop if it is not running yet.
    ///
    /// The loop stops when the shutdown coordinator fires.
    /// The task's output is the number of connections the stop shut down.
    pub fn start_hub(&self) -> Option<JoinHandle<usize>> {
        let hub = self.idle_hub.lock().take()?;
        Some(tokio::spawn(hub.run(self.shutdown.token())))
    }

    /// Bind the listener, start the hub, and serve until shutdown.
    ///
    /// Returns the bound address. The serving task is tracked by the
    /// [`ShutdownCoordinator`]; await
    /// [`graceful_shutdown`](ShutdownCoordinator::graceful_shutdown) to stop it.
    pub async fn listen(&self) -> Result<SocketAddr, std::io::Error> {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let hub_task = self.start_hub();
        let router = self.router();
        let token = self.shutdown.token();
        info!(addr = %local_addr, ws_path = %ws_route(&self.settings.ws_path), "duplex server listening");

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(err) = serve.await {
                warn!(error = %err, "server stopped with error");
            }
            match hub_task {
                Some(hub_task) => hub_task.await.unwrap_or_else(|err| {
                    warn!(error = %err, "hub task failed");
                    0
                }),
                None => 0,
            }
        });
        self.shutdown.track(handle);

        Ok(local_addr)
    }

    /// Handle for addressing live connections.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Listener settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Per-connection configuration.
    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.config
    }
}

fn ws_route(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// GET `<ws_path>`: upgrade and run a connection until it closes.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max_message_size = state.config.max_message_size;
    let read_buffer_size = state.config.read_buffer_size;
    let write_buffer_size = state.config.write_buffer_size;
    ws.max_message_size(max_message_size)
        .read_buffer_size(read_buffer_size)
        .write_buffer_size(write_buffer_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn = Connection::new(
        ConnectionId::random(),
        state.config.clone(),
        Arc::clone(&state.handler),
        Some(state.hub.clone()),
    );
    let (reader, writer) = transport::split_axum(socket);

    if !state.hub.register(Arc::clone(&conn)) {
        warn!(conn_id = %conn.id(), "hub stopped, dropping upgraded socket");
        return;
    }
    info!(conn_id = %conn.id(), "client connected");

    match conn.spawn_pumps(reader, writer) {
        Ok(pumps) => pumps.join().await,
        Err(err) => warn!(conn_id = %conn.id(), error = %err, "failed to start pumps"),
    }
    info!(conn_id = %conn.id(), "client disconnected");
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        &state.hub,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}
