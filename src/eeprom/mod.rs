//! Decoding of EEPROM-emulation logs stored in dataflash.
//!
//! Automotive flash-abstraction libraries emulate a small EEPROM by
//! appending records to a ring of fixed-size erasable blocks. Each block
//! starts with a header (activity flags, an erase counter, and the write
//! pointer the writer records for the block it previously filled), followed
//! by a table of reference slots locating the records; record data fills
//! the block from the opposite end. Two generations of that layout are
//! supported:
//!
//! v850, 0x1000-byte blocks, reference slots carrying a rolling checksum,
//! data growing down from the block end toward the write pointer:
//!
//! ```text
//! +--------+---------------+------ - - - ------+-------------------+
//! | header | ref slots ->  |      (free)       |       data        |
//! +--------+---------------+------ - - - ------+-------------------+
//! 0x0      0x40                                ^ rwp          0x1000
//! ```
//!
//! rh850, 0x800-byte blocks, guarded descriptors with the id universe held
//! in a table inside the companion code flash, the write pointer tracking
//! the descriptor side:
//!
//! ```text
//! +--------+------------------+------- - - - ------+---------------+
//! | header | descriptors ->   |       (free)       |     data      |
//! +--------+------------------+------- - - - ------+---------------+
//! 0x0      0x18               ^ rwp                           0x800
//! ```
//!
//! A block's own final write pointer lives in the header of the block the
//! writer moved on to, so the newest block's pointer exists nowhere in the
//! dump; the rh850 decoder recovers it by replaying the descriptor log.

use std::collections::BTreeMap;

use bytes::BufMut;
use thiserror::Error;

use crate::codec::OutOfRange;

mod catalog;
pub mod rh850;
#[cfg(test)]
pub(crate) mod testimg;
pub mod v850;

pub use catalog::{erase_order, scan_blocks, Block, Catalog};

/// Sentinel word confirming an active block header or a committed
/// descriptor guard.
pub const ACTIVE_FLAG: u32 = 0x5555_5555;

/// The two on-flash layouts this crate understands, named after the MCU
/// generation whose flash-abstraction library writes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// Forward reference table with rolling record checksums.
    V850,
    /// Backward guarded descriptor log with an external id table.
    Rh850,
}

impl Family {
    /// Size of one erasable block.
    pub fn block_size(self) -> usize {
        match self {
            Family::V850 => v850::BLOCK_SIZE,
            Family::Rh850 => rh850::BLOCK_SIZE,
        }
    }

    /// Decode a block window's header, or `None` if the active signature
    /// is absent.
    pub(crate) fn block_header(self, window: &[u8]) -> Option<BlockHeader> {
        match self {
            Family::V850 => v850::block_header(window),
            Family::Rh850 => rh850::block_header(window),
        }
    }
}

/// Header fields shared by both families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    /// Erase generation of the block carrying the header.
    pub erase_count: u32,
    /// Absolute write pointer this header records for some other block,
    /// or 0 when none was recorded.
    pub rwp: u32,
}

/// One reconstructed EEPROM value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    /// Logical EEPROM id.
    pub id: u16,
    /// Block-relative word index of the record's first data word.
    pub word_index: u32,
    /// Image-absolute byte address of that word.
    pub address: u32,
    /// Payload length in 32-bit words.
    pub length_words: u32,
    /// Payload words in commit order: the word at
    /// [`address`](Self::address) first, then descending addresses.
    pub words: Vec<u32>,
    /// Image-absolute address of the reference slot that located this
    /// record.
    pub reference_address: u32,
}

impl RecordEntry {
    /// Whether a payload has been read for this id.
    pub fn is_resolved(&self) -> bool {
        !self.words.is_empty()
    }

    /// The payload serialized as little-endian bytes.
    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.words.len() * 4);
        for word in &self.words {
            bytes.put_u32_le(*word);
        }
        bytes
    }
}

/// Ordered id-to-record table, the result of a reconstruction.
pub type RecordMap = BTreeMap<u16, RecordEntry>;

/// Why one reference slot could not be resolved into a record.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    /// The slot checksum does not cover the data words it points at.
    #[error("checksum mismatch: slot holds {stored:#010x}, data gives {computed:#010x}")]
    Checksum { stored: u32, computed: u32 },
    /// The record continues past the write pointer but the log holds no
    /// newer block to continue in.
    #[error("record crosses the write pointer with no successor block")]
    NoSuccessor,
    /// A descriptor's guard words were never committed.
    #[error("descriptor guard words not committed")]
    GuardMismatch,
    /// The decoded word index does not put the record inside its block.
    #[error("word index {0:#x} falls outside the block")]
    WordIndexRange(u32),
    /// The record data walks off the start of the image.
    #[error("record data runs off the start of the image")]
    Underflow,
    /// The record data runs past the end of the image.
    #[error(transparent)]
    Read(#[from] OutOfRange),
}

/// One slot the decoder had to skip, with enough provenance to find it in
/// a hex editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotFailure {
    /// Id claimed by the offending slot. Garbage slots may claim a
    /// garbage id.
    pub id: u16,
    /// Image-absolute address of the slot.
    pub address: u32,
    /// Why resolution failed.
    pub error: RecordError,
}

/// Best-effort result of one reconstruction run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reconstruction {
    /// Resolved records, plus (for rh850) declared-but-never-written stubs.
    pub records: RecordMap,
    /// Slots skipped during the scan, in scan order.
    pub failures: Vec<SlotFailure>,
}
