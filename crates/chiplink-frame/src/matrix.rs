//! The 48-output state grid.

use serde::Serialize;

use crate::error::{FrameError, Result};

/// Number of 8-bit output chips on a controller.
pub const CHIP_COUNT: usize = 6;

/// Outputs per chip.
pub const BITS_PER_CHIP: usize = 8;

/// Total number of outputs.
pub const OUTPUT_COUNT: usize = CHIP_COUNT * BITS_PER_CHIP;

/// A validated (chip, bit) coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BitAddress {
    chip: usize,
    bit: usize,
}

impl BitAddress {
    /// Build an address, rejecting anything outside the 6 × 8 grid.
    pub fn new(chip: usize, bit: usize) -> Result<Self> {
        if chip >= CHIP_COUNT || bit >= BITS_PER_CHIP {
            return Err(FrameError::OutOfRange { chip, bit });
        }
        Ok(Self { chip, bit })
    }

    /// Address for a global index `chip * 8 + bit`.
    pub fn from_index(index: usize) -> Result<Self> {
        Self::new(index / BITS_PER_CHIP, index % BITS_PER_CHIP)
    }

    pub fn chip(self) -> usize {
        self.chip
    }

    pub fn bit(self) -> usize {
        self.bit
    }

    /// Global index `chip * 8 + bit`.
    pub fn index(self) -> usize {
        self.chip * BITS_PER_CHIP + self.bit
    }
}

impl std::fmt::Display for BitAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chip {} bit {}", self.chip, self.bit)
    }
}

/// Desired state of all 48 outputs.
///
/// Always exactly [`OUTPUT_COUNT`] cells; an address uniquely identifies a
/// cell and carries no ordering meaning beyond that.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitMatrix {
    cells: [bool; OUTPUT_COUNT],
}

impl Default for BitMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl BitMatrix {
    /// All outputs off.
    pub const fn new() -> Self {
        Self {
            cells: [false; OUTPUT_COUNT],
        }
    }

    /// All outputs on.
    pub const fn all_set() -> Self {
        Self {
            cells: [true; OUTPUT_COUNT],
        }
    }

    /// Build from one byte per chip, bit 0 = LSB.
    pub fn from_chip_bytes(bytes: [u8; CHIP_COUNT]) -> Self {
        let mut matrix = Self::new();
        for (chip, byte) in bytes.iter().enumerate() {
            for bit in 0..BITS_PER_CHIP {
                matrix.cells[chip * BITS_PER_CHIP + bit] = byte & (1 << bit) != 0;
            }
        }
        matrix
    }

    pub fn get(&self, addr: BitAddress) -> bool {
        self.cells[addr.index()]
    }

    /// Set one output and return its previous value.
    pub fn set(&mut self, addr: BitAddress, value: bool) -> bool {
        std::mem::replace(&mut self.cells[addr.index()], value)
    }

    /// Flip one output and return its new value.
    pub fn toggle(&mut self, addr: BitAddress) -> bool {
        let cell = &mut self.cells[addr.index()];
        *cell = !*cell;
        *cell
    }

    /// Switch every output of one chip on or off.
    pub fn set_chip(&mut self, chip: usize, value: bool) -> Result<()> {
        if chip >= CHIP_COUNT {
            return Err(FrameError::OutOfRange { chip, bit: 0 });
        }
        let start = chip * BITS_PER_CHIP;
        self.cells[start..start + BITS_PER_CHIP].fill(value);
        Ok(())
    }

    /// Switch every output on or off.
    pub fn fill(&mut self, value: bool) {
        self.cells.fill(value);
    }

    /// Number of outputs currently on.
    pub fn count_set(&self) -> usize {
        self.cells.iter().filter(|cell| **cell).count()
    }

    /// Addresses of all outputs currently on, in index order.
    pub fn set_addresses(&self) -> impl Iterator<Item = BitAddress> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| **cell)
            .map(|(index, _)| BitAddress {
                chip: index / BITS_PER_CHIP,
                bit: index % BITS_PER_CHIP,
            })
    }

    /// Pack into one byte per chip, bit 0 = LSB.
    pub fn chip_bytes(&self) -> [u8; CHIP_COUNT] {
        let mut bytes = [0u8; CHIP_COUNT];
        for (index, cell) in self.cells.iter().enumerate() {
            if *cell {
                bytes[index / BITS_PER_CHIP] |= 1 << (index % BITS_PER_CHIP);
            }
        }
        bytes
    }
}

impl std::fmt::Debug for BitMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.chip_bytes();
        f.debug_struct("BitMatrix")
            .field("chips", &format_args!("{bytes:02X?}"))
            .finish()
    }
}
