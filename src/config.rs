//! Per-server configuration: size caps and I/O timeouts.

use std::time::Duration;

/// Knobs RFC 6455 leaves as implementation-defined or merely recommended.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Maximum total size, across all fragments, of one assembled message.
    /// Exceeding this closes the connection with status 1009.
    pub max_message_size: usize,
    /// Maximum size of the opening HTTP handshake request. Exceeding this
    /// fails the handshake outright (no frame is ever read).
    pub max_handshake_size: usize,
    /// Read timeout applied to the underlying stream. `None` means block
    /// forever. Exceeding it closes the connection with status 1011.
    pub read_timeout: Option<Duration>,
    /// Write timeout applied to the underlying stream. Same semantics as
    /// `read_timeout`.
    pub write_timeout: Option<Duration>,
}

impl Default for WsConfig {
    fn default() -> Self {
        WsConfig {
            max_message_size: 16 << 20,
            max_handshake_size: 8 << 10,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
