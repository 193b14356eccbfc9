/// Errors that can occur during packet encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The packet does not start with the `0xAA 0x55` sync pair.
    #[error("invalid packet sync (expected 0xAA 0x55, got {0:#04X} {1:#04X})")]
    InvalidSync(u8, u8),

    /// The packet checksum does not match its contents.
    #[error("checksum mismatch (expected {expected:#04X}, got {actual:#04X})")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// The buffer is not exactly one packet long.
    #[error("invalid packet length ({len} bytes, expected {expected})")]
    InvalidLength { len: usize, expected: usize },

    /// A chip or bit index outside the 6 × 8 output grid.
    #[error("output address out of range (chip {chip}, bit {bit})")]
    OutOfRange { chip: usize, bit: usize },

    /// An I/O error occurred while writing packets.
    #[error("packet I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before the packet was fully written.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
