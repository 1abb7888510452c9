//! Per-connection settings.

use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Default maximum frame length (16 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Shortest idle period honoured by the outbound loop.
pub const MIN_IDLE_TIMEOUT: Duration = Duration::from_millis(10);

/// Kind of byte stream under the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Reliable byte stream (TCP, TLS, pipes).
    #[default]
    Stream,
    /// Datagram adapter where each flush becomes one datagram.
    Datagram,
}

/// Settings applied to one connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Our protocol version, compared against the peer's handshake.
    pub protocol_version: i32,
    /// Time without received packets before a keep-alive is sent.
    /// Values below [`MIN_IDLE_TIMEOUT`] are raised to it.
    #[serde(rename = "idle_timeout_ms", deserialize_with = "millis")]
    pub idle_timeout: Duration,
    /// Originate keep-alives when the connection goes idle.
    pub auto_keep_alive: bool,
    pub transport: TransportKind,
    /// Flush after every packet. `None` picks the transport default.
    pub immediate_flush: Option<bool>,
    /// Also hand control packets to the application listener.
    pub notify_control_packets: bool,
    /// Largest accepted inbound frame.
    pub max_frame_length: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            protocol_version: 1,
            idle_timeout: Duration::from_secs(20),
            auto_keep_alive: false,
            transport: TransportKind::Stream,
            immediate_flush: None,
            notify_control_packets: false,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn with_protocol_version(mut self, version: i32) -> Self {
        self.protocol_version = version;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_auto_keep_alive(mut self, on: bool) -> Self {
        self.auto_keep_alive = on;
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn with_immediate_flush(mut self, on: bool) -> Self {
        self.immediate_flush = Some(on);
        self
    }

    #[must_use]
    pub fn with_notify_control_packets(mut self, on: bool) -> Self {
        self.notify_control_packets = on;
        self
    }

    #[must_use]
    pub fn with_max_frame_length(mut self, len: usize) -> Self {
        self.max_frame_length = len;
        self
    }

    /// Idle period actually used for keep-alive timing.
    pub fn idle_period(&self) -> Duration {
        self.idle_timeout.max(MIN_IDLE_TIMEOUT)
    }

    /// Whether every packet is flushed on its own.
    ///
    /// Datagram transports need one flush per packet so that one write
    /// becomes one datagram; stream transports batch by default.
    pub fn flush_each_packet(&self) -> bool {
        self.immediate_flush
            .unwrap_or(self.transport == TransportKind::Datagram)
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}
