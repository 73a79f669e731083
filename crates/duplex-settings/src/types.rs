//! Settings type definitions.
//!
//! Every section is `#[serde(default)]`, so a settings file only needs the
//! keys it wants to change. Field names are camelCase on the wire.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default write timeout for a single frame.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;
/// Default liveness window (max silence before the peer is considered gone).
pub const DEFAULT_LIVENESS_WINDOW_MS: u64 = 60_000;
/// Default maximum inbound message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32_000;
/// Default outbound queue capacity (messages).
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 255;
/// Default transport read/write buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
/// Smallest liveness window that leaves room for a shorter probe period.
pub const MIN_LIVENESS_WINDOW_MS: u64 = 2;

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "connection": { "livenessWindowMs": 30000 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DuplexSettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Per-connection lifecycle settings.
    pub connection: ConnectionSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Listener settings for the server shell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Path serving the WebSocket upgrade.
    pub ws_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ws_path: "/ws".to_string(),
        }
    }
}

/// Per-connection settings.
///
/// A zero value in any field means "use the default"; call
/// [`ConnectionSettings::resolved`] before reading durations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Time allowed to write one frame to the peer.
    pub write_timeout_ms: u64,
    /// Maximum silence before the inbound side gives up on the peer.
    pub liveness_window_ms: u64,
    /// Interval between liveness probes; must be below the window.
    pub probe_period_ms: u64,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Capacity of the outbound queue.
    pub send_queue_capacity: usize,
    /// Transport read buffer size in bytes.
    pub read_buffer_size: usize,
    /// Transport write buffer size in bytes.
    pub write_buffer_size: usize,
}

impl ConnectionSettings {
    /// Return a copy with every zero field replaced by its default.
    ///
    /// The probe period defaults to 9/10 of the liveness window. A configured
    /// period that is not strictly below the window is replaced the same way.
    /// Windows shorter than [`MIN_LIVENESS_WINDOW_MS`] are raised to it.
    #[must_use]
    pub fn resolved(&self) -> Self {
        let liveness_window_ms = non_zero_u64(self.liveness_window_ms, DEFAULT_LIVENESS_WINDOW_MS)
            .max(MIN_LIVENESS_WINDOW_MS);
        let default_probe = nine_tenths(liveness_window_ms).max(1);
        let mut probe_period_ms = non_zero_u64(self.probe_period_ms, default_probe);
        if probe_period_ms >= liveness_window_ms {
            warn!(
                probe_period_ms,
                liveness_window_ms, "probe period must be below the liveness window, using 9/10"
            );
            probe_period_ms = default_probe;
        }

        Self {
            write_timeout_ms: non_zero_u64(self.write_timeout_ms, DEFAULT_WRITE_TIMEOUT_MS),
            liveness_window_ms,
            probe_period_ms,
            max_message_size: non_zero_usize(self.max_message_size, DEFAULT_MAX_MESSAGE_SIZE),
            send_queue_capacity: non_zero_usize(
                self.send_queue_capacity,
                DEFAULT_SEND_QUEUE_CAPACITY,
            ),
            read_buffer_size: non_zero_usize(self.read_buffer_size, DEFAULT_BUFFER_SIZE),
            write_buffer_size: non_zero_usize(self.write_buffer_size, DEFAULT_BUFFER_SIZE),
        }
    }

    /// Write timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Liveness window as a [`Duration`].
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    /// Probe period as a [`Duration`].
    pub fn probe_period(&self) -> Duration {
        Duration::from_millis(self.probe_period_ms)
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`EnvFilter` syntax).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// `value * 9 / 10` without intermediate overflow.
fn nine_tenths(value: u64) -> u64 {
    value / 10 * 9 + value % 10 * 9 / 10
}

fn non_zero_u64(value: u64, default: u64) -> u64 {
    if value == 0 { default } else { value }
}

fn non_zero_usize(value: usize, default: usize) -> usize {
    if value == 0 { default } else { value }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
