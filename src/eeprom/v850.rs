//! The v850-generation layout: a forward table of checksummed reference
//! slots, with record data growing down from the block end and spilling
//! into the next block of the log when it does not fit.

use crate::codec::{self, OutOfRange};
use crate::image::DataflashImage;

use super::{
    erase_order, BlockHeader, Catalog, RecordEntry, RecordError, Reconstruction, SlotFailure,
    ACTIVE_FLAG,
};

/// Size of one erasable block.
pub const BLOCK_SIZE: usize = 0x1000;

/// In-block offsets of the three active-flag words.
const FLAG_OFFSETS: [usize; 3] = [0x10, 0x18, 0x20];
/// In-block offset of the erase counter.
const ERASE_COUNT_OFFSET: usize = 0x28;
/// In-block offset of the halved write pointer.
const RWP_OFFSET: usize = 0x30;
/// In-block offset of the first reference slot.
const REF_TABLE_OFFSET: u32 = 0x40;
/// Reference slot stride.
const SLOT_SIZE: u32 = 0x10;
/// Offset of the checksum word inside a slot.
const SLOT_CHECKSUM_OFFSET: u32 = 0x08;
/// Still-erased reference word, terminating the slot walk.
const END_MARKER: u32 = 0xffff_ffff;

/// Decode a window's header fields, or `None` without the signature.
pub(crate) fn block_header(window: &[u8]) -> Option<BlockHeader> {
    for offset in FLAG_OFFSETS {
        if codec::word_le(window, offset).ok()? != ACTIVE_FLAG {
            return None;
        }
    }
    let erase_count = codec::word_le(window, ERASE_COUNT_OFFSET).ok()?;
    // The pointer is stored halved; doubling a still-erased field would
    // overflow, which decodes as "nothing recorded".
    let rwp = codec::word_le(window, RWP_OFFSET)
        .ok()?
        .checked_mul(2)
        .unwrap_or(0);
    Some(BlockHeader { erase_count, rwp })
}

/// Walk every valid block's reference table in erase order and resolve the
/// record behind each slot. Later slots and later blocks overwrite earlier
/// entries for the same id, leaving the newest value.
pub fn reconstruct(
    image: &DataflashImage,
    catalog: &Catalog,
) -> Result<Reconstruction, OutOfRange> {
    let order = erase_order(catalog);
    let rpt = howudoin::new()
        .label("Reconstructing records")
        .set_len(u64::try_from(order.len()).ok());

    let block_size = image.block_size() as u32;
    let mut out = Reconstruction::default();
    for (position, &index) in order.iter().enumerate() {
        let base = image.block_base(index);
        let successor_base = order.get(position + 1).map(|&next| image.block_base(next));
        let rwp = catalog[index].rwp;

        let mut slot = base + REF_TABLE_OFFSET;
        while slot + SLOT_SIZE <= base + block_size {
            // The slot area must never run into the data area.
            if rwp != 0 && slot >= rwp {
                break;
            }
            let reference = image.word_le(slot)?;
            if reference == END_MARKER {
                break;
            }
            let checksum = image.word_le(slot + SLOT_CHECKSUM_OFFSET)?;
            match resolve(image, base, rwp, successor_base, slot, reference, checksum) {
                Ok(entry) => {
                    out.records.insert(entry.id, entry);
                }
                Err(error) => out.failures.push(SlotFailure {
                    id: (reference & 0xffff) as u16,
                    address: slot,
                    error,
                }),
            }
            slot += SLOT_SIZE;
        }
        rpt.inc();
    }

    rpt.close();
    Ok(out)
}

/// Read back one referenced record and verify its rolling checksum.
fn resolve(
    image: &DataflashImage,
    base: u32,
    rwp: u32,
    successor_base: Option<u32>,
    slot: u32,
    reference: u32,
    checksum: u32,
) -> Result<RecordEntry, RecordError> {
    let word_index = reference >> 16;
    let id = (reference & 0xffff) as u16;
    let address = base + word_index * 4;

    // The first data word carries the record's byte length in its low half.
    let length_bytes = image.word_le(address)? & 0xffff;
    let length_words = (length_bytes + 3) / 4;

    let mut words = Vec::with_capacity(length_words as usize);
    let mut cursor = Some(address);
    let mut spilled = false;
    for _ in 0..length_words {
        let mut at = cursor.ok_or(RecordError::Underflow)?;
        // Reaching the write pointer means the rest of the record was
        // committed at the end of the next block in the log.
        if !spilled && rwp != 0 && at <= rwp {
            let successor = successor_base.ok_or(RecordError::NoSuccessor)?;
            at = successor + image.block_size() as u32 - 4;
            spilled = true;
        }
        words.push(image.word_le(at)?);
        cursor = at.checked_sub(4);
    }

    let mut computed = 0xffff_ffffu32.wrapping_sub(u32::from(id));
    for word in &words {
        computed = computed.wrapping_sub(*word);
    }
    if computed != checksum {
        return Err(RecordError::Checksum {
            stored: checksum,
            computed,
        });
    }

    Ok(RecordEntry {
        id,
        word_index,
        address,
        length_words,
        words,
        reference_address: slot,
    })
}
