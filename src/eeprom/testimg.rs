//! Synthetic dataflash images for the decoder tests, committed the same
//! way the on-target writers do it: data words walking down from the block
//! end, reference slots walking up behind the header.
//!
//! Offsets are restated here as plain numbers on purpose, so a decoder
//! regression cannot cancel out against the fixtures.

use crate::codec;
use crate::image::DataflashImage;

use super::ACTIVE_FLAG;

/// An erased flat image under construction.
pub struct TestImage {
    pub bytes: Vec<u8>,
    pub block_size: usize,
}

impl TestImage {
    pub fn new(blocks: usize, block_size: usize) -> Self {
        Self {
            bytes: vec![0xff; blocks * block_size],
            block_size,
        }
    }

    /// Commit one little-endian word at an absolute address.
    pub fn put(&mut self, address: u32, word: u32) {
        codec::put_word_le(&mut self.bytes, address as usize, word).unwrap();
    }

    /// Absolute address of the start of a block.
    pub fn base(&self, index: usize) -> u32 {
        (index * self.block_size) as u32
    }

    pub fn into_image(self) -> DataflashImage {
        DataflashImage::new(self.bytes, self.block_size).unwrap()
    }
}

/// Stamp a v850 active header: three flag words and the erase counter.
pub fn v850_header(img: &mut TestImage, index: usize, erase_count: u32) {
    let base = img.base(index);
    for offset in [0x10, 0x18, 0x20] {
        img.put(base + offset, ACTIVE_FLAG);
    }
    img.put(base + 0x28, erase_count);
}

/// Record some block's final write pointer in this block's header, stored
/// halved the way the writer finalizes it.
pub fn v850_store_rwp(img: &mut TestImage, index: usize, rwp: u32) {
    let base = img.base(index);
    img.put(base + 0x30, rwp / 2);
}

/// The rolling record checksum as the v850 writer computes it.
pub fn v850_checksum(id: u16, words: &[u32]) -> u32 {
    let mut sum = 0xffff_ffffu32.wrapping_sub(u32::from(id));
    for word in words {
        sum = sum.wrapping_sub(*word);
    }
    sum
}

/// Writer-side cursors for one v850 block log.
pub struct V850Log<'a> {
    img: &'a mut TestImage,
    base: u32,
    slot: u32,
    data: u32,
}

impl<'a> V850Log<'a> {
    pub fn new(img: &'a mut TestImage, index: usize, erase_count: u32) -> Self {
        v850_header(img, index, erase_count);
        let base = img.base(index);
        let block_size = img.block_size as u32;
        Self {
            img,
            base,
            slot: base + 0x40,
            data: base + block_size - 4,
        }
    }

    /// Commit a record (data words walking down, then the reference slot).
    /// The first word's low half must carry the record's byte length.
    pub fn push(&mut self, id: u16, words: &[u32]) {
        self.push_with_checksum(id, words, v850_checksum(id, words));
    }

    pub fn push_with_checksum(&mut self, id: u16, words: &[u32], checksum: u32) {
        debug_assert_eq!(words.len() as u32, ((words[0] & 0xffff) + 3) / 4);
        let word_index = (self.data - self.base) / 4;
        for (step, word) in words.iter().enumerate() {
            self.img.put(self.data - 4 * step as u32, *word);
        }
        self.img.put(self.slot, (word_index << 16) | u32::from(id));
        self.img.put(self.slot + 0x08, checksum);
        self.slot += 0x10;
        self.data -= 4 * words.len() as u32;
    }

    /// Move the data cursor past words already occupied, such as the tail
    /// of a record spilled from the previous block.
    pub fn skip_data(&mut self, words: u32) {
        self.data -= 4 * words;
    }

    /// Where the next data word would go: the block's final write pointer.
    pub fn rwp(&self) -> u32 {
        self.data
    }
}

/// Encode an rh850 checksummed header field: value in the low 24 bits, a
/// balancing byte on top so the four bytes sum to 0xFF.
pub fn rh850_field(value: u32) -> u32 {
    debug_assert_eq!(value & 0xff00_0000, 0);
    let sum = value
        .to_le_bytes()[..3]
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte));
    value | u32::from(0xffu8.wrapping_sub(sum)) << 24
}

/// Stamp an rh850 active header. `stored_rwp` is the pointer this header
/// records for some other block; pass 0 when there is none.
pub fn rh850_header(img: &mut TestImage, index: usize, erase_count: u32, stored_rwp: u32) {
    let base = img.base(index);
    for offset in [0x04, 0x08, 0x0c] {
        img.put(base + offset, ACTIVE_FLAG);
    }
    img.put(base + 0x10, rh850_field(erase_count));
    img.put(base + 0x14, rh850_field(stored_rwp));
}

/// Writer-side cursors for one rh850 block log.
pub struct Rh850Log<'a> {
    img: &'a mut TestImage,
    base: u32,
    descriptor: u32,
    data: u32,
}

impl<'a> Rh850Log<'a> {
    pub fn new(img: &'a mut TestImage, index: usize, erase_count: u32, stored_rwp: u32) -> Self {
        rh850_header(img, index, erase_count, stored_rwp);
        let base = img.base(index);
        let block_size = img.block_size as u32;
        Self {
            img,
            base,
            descriptor: base + 0x18,
            data: base + block_size - 4,
        }
    }

    /// Commit a record: payload words walking down, then the guarded
    /// descriptor. Lengths are not stored here; the id table declares them.
    pub fn push(&mut self, id: u16, words: &[u32]) {
        let word_index = (self.data - self.base) / 4;
        for (step, word) in words.iter().enumerate() {
            self.img.put(self.data - 4 * step as u32, *word);
        }
        for guard in 0..3 {
            self.img.put(self.descriptor + 4 * guard, ACTIVE_FLAG);
        }
        self.img
            .put(self.descriptor + 12, (word_index << 16) | u32::from(id));
        self.descriptor += 0x10;
        self.data -= 4 * words.len() as u32;
    }

    /// The log's write pointer: just past the newest committed descriptor.
    pub fn rwp(&self) -> u32 {
        self.descriptor
    }
}

/// Build a companion code image: the table header at `header_address`, the
/// id/length words right after it.
pub fn rh850_code_image(header_address: u32, block_size: u16, entries: &[(u16, u32)]) -> Vec<u8> {
    let rom_address = header_address + 16;
    let mut code = vec![0u8; rom_address as usize + entries.len() * 4 + 8];
    let at = header_address as usize;
    codec::put_word_le(&mut code, at, u32::from(block_size) | 2 << 16).unwrap();
    codec::put_word_le(&mut code, at + 4, rom_address).unwrap();
    codec::put_word_le(&mut code, at + 8, 0xfebd_0000).unwrap();
    codec::put_word_le(&mut code, at + 12, entries.len() as u32 | 8 << 16).unwrap();
    for (entry, &(id, length_bytes)) in entries.iter().enumerate() {
        debug_assert!(length_bytes <= 0xffff);
        codec::put_word_le(
            &mut code,
            rom_address as usize + entry * 4,
            length_bytes << 16 | u32::from(id),
        )
        .unwrap();
    }
    code
}
