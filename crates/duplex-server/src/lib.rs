//! # duplex-server
//!
//! Full-duplex connections over WebSocket.
//!
//! - [`connection::Connection`]: outbound queue, liveness, correlated requests
//! - [`hub::Hub`]: single-owner registry with broadcast and unicast
//! - [`server::DuplexServer`]: axum shell accepting upgrades into a hub
//! - [`client::connect`]: dialing shell for standalone connections
//! - [`transport`]: reader/writer seam with axum and tokio-tungstenite
//!   implementations; an in-memory pair lives in `memory` behind the
//!   `testing` feature
//! - Health, metrics and graceful shutdown

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod connection;
pub mod errors;
pub mod handler;
pub mod health;
pub mod hub;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod transport;

pub use config::ConnectionConfig;
pub use connection::{Connection, Incoming, Responder};
pub use errors::{ConnectionError, TransportError};
pub use handler::{ConnectionHandler, DefaultHandler};
pub use hub::{Hub, HubHandle};
pub use server::DuplexServer;
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome};
