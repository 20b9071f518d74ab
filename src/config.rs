//! Configuration structures for transports and sessions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transport type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Serial port (COM port, /dev/tty*).
    Serial,
    /// TCP client connection.
    Tcp,
    /// UDP datagram socket.
    Udp,
    /// In-memory loopback (for testing).
    Loopback,
}

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit (default).
    #[default]
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

/// Serial port configuration.
///
/// All fields other than `port` have device-appropriate defaults; Actisense
/// gateways ship at 115200 8N1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g. "COM7", "/dev/ttyUSB0").
    pub port: String,
    /// Baud rate.
    pub baud: u32,
    /// Data bits (5-8).
    pub data_bits: u8,
    /// Parity.
    pub parity: Parity,
    /// Stop bits (1 or 2).
    pub stop_bits: u8,
    /// Receive ring capacity in bytes (rounded up to a power of two).
    pub read_buffer_size: usize,
    /// Per-receive poll cap in milliseconds.
    pub read_timeout_ms: u64,
    /// Message-ring capacity for message-oriented transports.
    pub max_pending_messages: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud: 115_200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            read_buffer_size: 4096,
            read_timeout_ms: 100,
            max_pending_messages: 16,
        }
    }
}

impl SerialConfig {
    /// Config for the given port with default line settings.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// Per-receive poll cap as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
