//! Resolved per-connection configuration.

use std::time::Duration;

use duplex_settings::{
    ConnectionSettings, DEFAULT_BUFFER_SIZE, DEFAULT_LIVENESS_WINDOW_MS, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_SEND_QUEUE_CAPACITY, DEFAULT_WRITE_TIMEOUT_MS, MIN_LIVENESS_WINDOW_MS,
};
use tracing::warn;

/// Connection parameters.
///
/// Fields are public, so a hand-built value may carry zeros;
/// [`crate::Connection::new`] runs [`ConnectionConfig::resolved`] before use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Time allowed to write one frame.
    pub write_timeout: Duration,
    /// Maximum silence before the inbound pump gives up on the peer.
    pub liveness_window: Duration,
    /// Interval between liveness probes.
    pub probe_period: Duration,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Transport read buffer size in bytes.
    pub read_buffer_size: usize,
    /// Transport write buffer size in bytes.
    pub write_buffer_size: usize,
}

impl ConnectionConfig {
    /// Return a copy with zero fields replaced by their defaults and the
    /// probe period strictly below the liveness window.
    #[must_use]
    pub fn resolved(&self) -> Self {
        let liveness_window = if self.liveness_window.is_zero() {
            Duration::from_millis(DEFAULT_LIVENESS_WINDOW_MS)
        } else {
            self.liveness_window
                .max(Duration::from_millis(MIN_LIVENESS_WINDOW_MS))
        };
        let default_probe = liveness_window / 10 * 9;
        let probe_period = if self.probe_period.is_zero() {
            default_probe
        } else if self.probe_period >= liveness_window {
            warn!(
                probe_period = ?self.probe_period,
                liveness_window = ?liveness_window,
                "probe period must be below the liveness window, using 9/10"
            );
            default_probe
        } else {
            self.probe_period
        };

        Self {
            write_timeout: non_zero_duration(
                self.write_timeout,
                Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            ),
            liveness_window,
            probe_period,
            max_message_size: non_zero(self.max_message_size, DEFAULT_MAX_MESSAGE_SIZE),
            send_queue_capacity: non_zero(self.send_queue_capacity, DEFAULT_SEND_QUEUE_CAPACITY),
            read_buffer_size: non_zero(self.read_buffer_size, DEFAULT_BUFFER_SIZE),
            write_buffer_size: non_zero(self.write_buffer_size, DEFAULT_BUFFER_SIZE),
        }
    }
}

fn non_zero_duration(value: Duration, default: Duration) -> Duration {
    if value.is_zero() { default } else { value }
}

fn non_zero(value: usize, default: usize) -> usize {
    if value == 0 { default } else { value }
}

impl From<&ConnectionSettings> for ConnectionConfig {
    fn from(settings: &ConnectionSettings) -> Self {
        let s = settings.resolved();
        Self {
            write_timeout: s.write_timeout(),
            liveness_window: s.liveness_window(),
            probe_period: s.probe_period(),
            max_message_size: s.max_message_size,
            send_queue_capacity: s.send_queue_capacity,
            read_buffer_size: s.read_buffer_size,
            write_buffer_size: s.write_buffer_size,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&ConnectionSettings::default())
    }
}
