use std::time::Duration;

use chiplink_frame::CMD_SET_OUTPUTS;

/// Port controllers listen on out of the box.
pub const DEFAULT_PORT: u16 = 8080;

/// Timing and protocol knobs for a [`ConnectionSession`](crate::ConnectionSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connect, read and write timeout on the controller socket. Default: 2s.
    pub io_timeout: Duration,
    /// Watchdog tick period. Default: 1s.
    pub heartbeat_interval: Duration,
    /// Quiet time after which the watchdog re-sends the outputs. Default: 2s.
    pub keepalive_after: Duration,
    /// Quiet time after which the link is declared dead. Default: 6s.
    pub liveness_timeout: Duration,
    /// Command byte for outbound packets. Default: `0x01`.
    pub command: u8,
    /// Maximum bytes taken per read. Default: 1024.
    pub read_chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(1),
            keepalive_after: Duration::from_secs(2),
            liveness_timeout: Duration::from_secs(6),
            command: CMD_SET_OUTPUTS,
            read_chunk_size: 1024,
        }
    }
}
