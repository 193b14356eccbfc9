//! Output-state packet codec for chiplink controllers.
//!
//! A controller drives 48 outputs arranged as 6 chips of 8 bits. The full
//! output state travels in one fixed 10-byte packet:
//! - 2 sync bytes (`0xAA 0x55`)
//! - 1 command byte (`0x01` = set outputs)
//! - 6 data bytes, one per chip, LSB = bit 0
//! - 1 checksum byte, the 8-bit sum of command and data
//!
//! Inbound traffic is unframed; see [`classify`] for how chunks are read.

pub mod codec;
pub mod error;
pub mod matrix;
pub mod writer;

pub use codec::{
    checksum, classify, encode, encode_with_cmd, hex_dump, Inbound, OutputFrame, Packet, ACK,
    CMD_SET_OUTPUTS, PACKET_SIZE, SYNC,
};
pub use error::{FrameError, Result};
pub use matrix::{BitAddress, BitMatrix, BITS_PER_CHIP, CHIP_COUNT, OUTPUT_COUNT};
pub use writer::PacketWriter;
