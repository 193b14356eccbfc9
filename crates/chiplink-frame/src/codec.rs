use bytes::Bytes;

use crate::error::{FrameError, Result};
use crate::matrix::{BitMatrix, CHIP_COUNT};

/// Packet size: sync (2) + cmd (1) + data (6) + checksum (1) = 10 bytes.
pub const PACKET_SIZE: usize = 10;

/// Sync bytes opening every outbound packet.
pub const SYNC: [u8; 2] = [0xAA, 0x55];

/// Command byte: replace the full output state.
pub const CMD_SET_OUTPUTS: u8 = 0x01;

/// Acknowledgement byte sent by the controller after accepting a packet.
pub const ACK: u8 = 0x06;

/// One byte per chip, derived from a [`BitMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputFrame([u8; CHIP_COUNT]);

impl OutputFrame {
    pub fn from_matrix(matrix: &BitMatrix) -> Self {
        Self(matrix.chip_bytes())
    }

    pub fn from_bytes(bytes: [u8; CHIP_COUNT]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; CHIP_COUNT] {
        &self.0
    }

    /// Re-derive the matrix this frame encodes.
    pub fn to_matrix(&self) -> BitMatrix {
        BitMatrix::from_chip_bytes(self.0)
    }
}

/// A complete wire packet.
///
/// Wire format:
/// ```text
/// ┌──────────┬─────┬──────────────────────┬──────────┐
/// │ Sync (2) │ Cmd │ Data (6, chip 0..5)  │ Checksum │
/// │ AA 55    │ 01  │ bit0 = LSB           │ Σ & 0xFF │
/// └──────────┴─────┴──────────────────────┴──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Packet([u8; PACKET_SIZE]);

impl Packet {
    /// Assemble a packet from a command and frame.
    pub fn new(cmd: u8, frame: OutputFrame) -> Self {
        let mut raw = [0u8; PACKET_SIZE];
        raw[..2].copy_from_slice(&SYNC);
        raw[2] = cmd;
        raw[3..9].copy_from_slice(frame.bytes());
        raw[9] = checksum(cmd, frame.bytes());
        Self(raw)
    }

    /// Parse and validate a packet.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let raw: [u8; PACKET_SIZE] = buf.try_into().map_err(|_| FrameError::InvalidLength {
            len: buf.len(),
            expected: PACKET_SIZE,
        })?;

        if raw[..2] != SYNC {
            return Err(FrameError::InvalidSync(raw[0], raw[1]));
        }

        let expected = checksum(raw[2], &raw[3..9]);
        if raw[9] != expected {
            return Err(FrameError::ChecksumMismatch {
                expected,
                actual: raw[9],
            });
        }

        Ok(Self(raw))
    }

    pub fn cmd(&self) -> u8 {
        self.0[2]
    }

    pub fn frame(&self) -> OutputFrame {
        let mut bytes = [0u8; CHIP_COUNT];
        bytes.copy_from_slice(&self.0[3..9]);
        OutputFrame(bytes)
    }

    pub fn checksum(&self) -> u8 {
        self.0[9]
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_SIZE] {
        &self.0
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// 8-bit truncated sum of the command byte and the data bytes.
pub fn checksum(cmd: u8, data: &[u8]) -> u8 {
    data.iter().fold(cmd, |acc, byte| acc.wrapping_add(*byte))
}

/// Encode a matrix as a set-outputs packet.
pub fn encode(matrix: &BitMatrix) -> Packet {
    encode_with_cmd(matrix, CMD_SET_OUTPUTS)
}

/// Encode a matrix under an explicit command byte.
pub fn encode_with_cmd(matrix: &BitMatrix, cmd: u8) -> Packet {
    Packet::new(cmd, OutputFrame::from_matrix(matrix))
}

/// Coarse reading of one inbound chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The chunk contained an ACK byte.
    Ack,
    /// Anything else, kept for diagnostics.
    Data(Bytes),
}

/// Classify a received chunk.
///
/// The stream is unframed: any `0x06` anywhere in the chunk counts as an ACK,
/// so a data byte of that value inside a larger payload is misread as one.
/// The controller protocol leaves this ambiguous and it is kept as observed.
pub fn classify(chunk: &[u8]) -> Inbound {
    if chunk.contains(&ACK) {
        Inbound::Ack
    } else {
        Inbound::Data(Bytes::copy_from_slice(chunk))
    }
}

/// Render bytes as space-separated upper-case hex (`AA 55 01`).
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}
