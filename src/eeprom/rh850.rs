//! The rh850-generation layout: record ids and lengths live in a table
//! inside the companion code flash, descriptors carry guard sentinels
//! instead of checksums, and the newest block's write pointer has to be
//! recovered by replaying its descriptor log.

use std::collections::BTreeMap;

use bytes::Buf;
use thiserror::Error;

use crate::codec::{self, OutOfRange};
use crate::image::DataflashImage;

use super::{
    erase_order, BlockHeader, Catalog, RecordEntry, RecordError, RecordMap, Reconstruction,
    SlotFailure, ACTIVE_FLAG,
};

/// Size of one erasable block.
pub const BLOCK_SIZE: usize = 0x800;

/// In-block offsets of the three active-flag words.
const FLAG_OFFSETS: [usize; 3] = [0x04, 0x08, 0x0c];
/// Erase counter field, value plus balancing checksum byte.
const ERASE_COUNT_OFFSET: usize = 0x10;
/// Write pointer field, recorded for the previously filled block.
const RWP_OFFSET: usize = 0x14;
/// End of the header, where the descriptor log begins.
const LOG_OFFSET: u32 = 0x18;
/// Descriptor stride: three guard words plus the reference word.
const DESCRIPTOR_SIZE: u32 = 0x10;
/// Low 24 bits of a checksummed header field carry the value.
const FIELD_VALUE_MASK: u32 = 0x00ff_ffff;

/// Decode a window's header fields, or `None` without the signature.
pub(crate) fn block_header(window: &[u8]) -> Option<BlockHeader> {
    for offset in FLAG_OFFSETS {
        if codec::word_le(window, offset).ok()? != ACTIVE_FLAG {
            return None;
        }
    }
    let erase_count = checked_field(window, ERASE_COUNT_OFFSET)?;
    let rwp = checked_field(window, RWP_OFFSET)?;
    Some(BlockHeader { erase_count, rwp })
}

/// Read a header field whose four raw bytes must sum to 0xFF; the top byte
/// balances the sum and the low 24 bits are the value.
fn checked_field(window: &[u8], offset: usize) -> Option<u32> {
    let raw = window.get(offset..offset + 4)?;
    if codec::sum8(raw) != 0xff {
        return None;
    }
    Some(u32::from_le_bytes(raw.try_into().unwrap()) & FIELD_VALUE_MASK)
}

/// Companion table loading failures. All of them are fatal: without a
/// trustworthy id table no block can be decoded.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// The 16-byte table header does not fit the code image.
    #[error("table header at {address:#x} runs past the end of the {size:#x}-byte code image")]
    HeaderOutOfRange { address: u32, size: usize },
    /// An entry declares a record longer than one block; this layout never
    /// spans blocks.
    #[error("table entry {id:#06x} declares {length} bytes, more than the {block_size:#x}-byte block")]
    EntryTooLarge { id: u16, length: u32, block_size: u32 },
    /// The id/length words themselves are unreadable.
    #[error(transparent)]
    Read(#[from] OutOfRange),
}

/// Fixed-layout table header embedded in the companion code image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    /// Dataflash block size the firmware was built for.
    pub block_size: u16,
    /// Blocks the firmware keeps erased ahead of the log.
    pub prepared_blocks_min: u16,
    /// Address of the id/length words inside the code image.
    pub rom_address: u32,
    /// RAM mirror address; not needed for decoding.
    pub ram_address: u32,
    /// Number of id/length words.
    pub entries: u16,
    /// Erase-suspend tuning; not needed for decoding.
    pub erase_suspend_threshold: u16,
}

/// Table header size in the code image.
const TABLE_HEADER_SIZE: usize = 16;

impl TableHeader {
    /// Parse the header at an absolute code-image address.
    pub fn parse(code: &[u8], address: u32) -> Result<Self, TableError> {
        let start = address as usize;
        let end = start
            .checked_add(TABLE_HEADER_SIZE)
            .filter(|&end| end <= code.len());
        let Some(end) = end else {
            return Err(TableError::HeaderOutOfRange {
                address,
                size: code.len(),
            });
        };
        let mut fields = &code[start..end];
        let sizes = fields.get_u32_le();
        let rom_address = fields.get_u32_le();
        let ram_address = fields.get_u32_le();
        let counts = fields.get_u32_le();
        Ok(Self {
            block_size: (sizes & 0xffff) as u16,
            prepared_blocks_min: (sizes >> 16) as u16,
            rom_address,
            ram_address,
            entries: (counts & 0xffff) as u16,
            erase_suspend_threshold: (counts >> 16) as u16,
        })
    }
}

/// The id-to-length table: the universe of record ids the firmware
/// emulates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdTable {
    /// The header the table was loaded through.
    pub header: TableHeader,
    lengths: BTreeMap<u16, u32>,
}

impl IdTable {
    /// Load the table the header points at. Each entry word packs the id
    /// in its low half and the record's byte length in its high half.
    pub fn load(code: &[u8], header_address: u32) -> Result<Self, TableError> {
        let header = TableHeader::parse(code, header_address)?;
        let mut lengths = BTreeMap::new();
        for entry in 0..usize::from(header.entries) {
            let word = codec::word_le(code, header.rom_address as usize + entry * 4)?;
            let id = (word & 0xffff) as u16;
            let length = word >> 16;
            if length > u32::from(header.block_size) {
                return Err(TableError::EntryTooLarge {
                    id,
                    length,
                    block_size: u32::from(header.block_size),
                });
            }
            lengths.insert(id, length / 4);
        }
        Ok(Self { header, lengths })
    }

    /// Declared payload length of an id, in words.
    pub fn length_words(&self, id: u16) -> Option<u32> {
        self.lengths.get(&id).copied()
    }

    /// One empty stub per declared id, the starting point of a
    /// reconstruction.
    fn stub_records(&self) -> RecordMap {
        self.lengths
            .iter()
            .map(|(&id, &length_words)| {
                let stub = RecordEntry {
                    id,
                    word_index: 0,
                    address: 0,
                    length_words,
                    words: Vec::new(),
                    reference_address: 0,
                };
                (id, stub)
            })
            .collect()
    }
}

/// Walk every valid block's descriptor log backward from its write pointer
/// in erase order, filling each table stub from the first (newest) commit
/// seen for its id.
pub fn reconstruct(
    image: &DataflashImage,
    catalog: &Catalog,
    table: &IdTable,
) -> Result<Reconstruction, OutOfRange> {
    let order = erase_order(catalog);
    let rpt = howudoin::new()
        .label("Reconstructing records")
        .set_len(u64::try_from(order.len()).ok());

    let block_size = image.block_size() as u32;
    let mut out = Reconstruction {
        records: table.stub_records(),
        failures: Vec::new(),
    };
    for &index in &order {
        let base = image.block_base(index);
        let rwp = match catalog[index].rwp {
            0 => recover_rwp(image, base, table)?,
            rwp => rwp,
        };

        // Lowest address a complete descriptor's reference word can sit at.
        let first_reference = base + LOG_OFFSET + DESCRIPTOR_SIZE - 4;
        let mut reference = rwp.checked_sub(4);
        while let Some(address) = reference {
            if address < first_reference {
                break;
            }
            let word = image.word_le(address)?;
            let word_index = word >> 16;
            let id = (word & 0xffff) as u16;

            if !guards_committed(image, address)? {
                out.failures.push(SlotFailure {
                    id,
                    address,
                    error: RecordError::GuardMismatch,
                });
            } else if word_index * 4 >= block_size {
                out.failures.push(SlotFailure {
                    id,
                    address,
                    error: RecordError::WordIndexRange(word_index),
                });
            } else if let Some(stub) = out.records.get_mut(&id) {
                // Ids absent from the table are passed over without note,
                // as is any stub already filled by a newer commit.
                if !stub.is_resolved() {
                    match read_payload(image, base, word_index, stub.length_words) {
                        Ok(words) => {
                            stub.word_index = word_index;
                            stub.address = base + word_index * 4;
                            stub.reference_address = address;
                            stub.words = words;
                        }
                        Err(error) => out.failures.push(SlotFailure {
                            id,
                            address,
                            error,
                        }),
                    }
                }
            }

            reference = address.checked_sub(DESCRIPTOR_SIZE);
        }
        rpt.inc();
    }

    rpt.close();
    Ok(out)
}

/// Whether the three guard words before a reference word were committed.
fn guards_committed(image: &DataflashImage, reference: u32) -> Result<bool, OutOfRange> {
    for back in [4u32, 8, 12] {
        if image.word_le(reference - back)? != ACTIVE_FLAG {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Read `length_words` words at descending addresses starting from the
/// record's first word. The whole span must stay inside the block.
fn read_payload(
    image: &DataflashImage,
    base: u32,
    word_index: u32,
    length_words: u32,
) -> Result<Vec<u32>, RecordError> {
    if word_index + 1 < length_words {
        return Err(RecordError::WordIndexRange(word_index));
    }
    let mut words = Vec::with_capacity(length_words as usize);
    for step in 0..length_words {
        words.push(image.word_le(base + (word_index - step) * 4)?);
    }
    Ok(words)
}

/// Infer an in-progress block's write pointer by replaying its descriptor
/// log forward. A descriptor only counts when its guards are committed,
/// its id is in the table, and its record sits exactly where the next
/// write had to go; each confirmed descriptor advances the pointer to just
/// past itself.
fn recover_rwp(image: &DataflashImage, base: u32, table: &IdTable) -> Result<u32, OutOfRange> {
    let block_size = image.block_size() as u32;
    let mut expected_data = base + block_size - 4;
    let mut rwp = base + LOG_OFFSET;

    let mut stride = base + LOG_OFFSET + DESCRIPTOR_SIZE;
    while stride <= base + block_size {
        let reference = stride - 4;
        let word = image.word_le(reference)?;
        let word_index = word >> 16;
        let id = (word & 0xffff) as u16;

        if guards_committed(image, reference)? && word_index * 4 < block_size {
            if let Some(length_words) = table.length_words(id) {
                if base + word_index * 4 == expected_data {
                    expected_data = expected_data.wrapping_sub(length_words * 4);
                    rwp = stride;
                }
            }
        }
        stride += DESCRIPTOR_SIZE;
    }
    Ok(rwp)
}
