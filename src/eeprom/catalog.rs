//! Block catalog: classify every window of a dump and order the valid
//! blocks by erase generation.

use std::collections::BTreeMap;

use crate::image::DataflashImage;

use super::Family;

/// One block's catalog entry. Windows without a valid header stay in the
/// catalog so block indices remain stable; everything downstream skips
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Position of the window in the image.
    pub index: usize,
    /// Whether the window carries the family's active-block signature.
    pub is_valid: bool,
    /// Erase generation; meaningful only when valid.
    pub erase_count: u32,
    /// Absolute address of the first free word of this block's log, or 0
    /// while unknown. The writer records it one block ahead, so it is
    /// collected from every other valid header and registered back here.
    pub rwp: u32,
}

/// The block catalog, indexed by block number.
pub type Catalog = Box<[Block]>;

/// Classify every block window, then register the write pointers the valid
/// headers record for each other.
pub fn scan_blocks(image: &DataflashImage, family: Family) -> Catalog {
    let block_count = image.block_count();
    let rpt = howudoin::new()
        .label("Scanning blocks")
        .set_len(u64::try_from(block_count).ok());

    let mut headers = Vec::with_capacity(block_count);
    for index in 0..block_count {
        headers.push(family.block_header(image.block_bytes(index)));
        rpt.inc();
    }

    let mut blocks: Vec<Block> = headers
        .iter()
        .enumerate()
        .map(|(index, header)| Block {
            index,
            is_valid: header.is_some(),
            erase_count: header.map_or(0, |header| header.erase_count),
            rwp: 0,
        })
        .collect();

    // A recorded pointer names its block purely by address. Zero and
    // out-of-image addresses mean nothing was recorded.
    let image_len = image.as_bytes().len();
    for header in headers.into_iter().flatten() {
        let address = header.rwp;
        if address == 0 || address as usize >= image_len {
            continue;
        }
        blocks[address as usize / image.block_size()].rwp = address;
    }

    rpt.close();
    blocks.into_boxed_slice()
}

/// Oldest-to-newest scan sequence over the valid blocks: ascending erase
/// counter, ascending block index within a generation.
pub fn erase_order(catalog: &Catalog) -> Vec<usize> {
    let mut by_generation: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for block in catalog.iter().filter(|block| block.is_valid) {
        by_generation
            .entry(block.erase_count)
            .or_default()
            .push(block.index);
    }
    by_generation.into_values().flatten().collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::eeprom::testimg::{self, TestImage};

    #[test]
    fn test_scan_v850() {
        let mut img = TestImage::new(3, 0x1000);
        testimg::v850_header(&mut img, 0, 7);
        testimg::v850_header(&mut img, 1, 9);
        // Block 1 finalizes block 0's write pointer; block 2 stays erased.
        testimg::v850_store_rwp(&mut img, 1, 0xabc);
        let image = img.into_image();

        let catalog = scan_blocks(&image, Family::V850);
        assert_eq!(
            *catalog,
            [
                Block {
                    index: 0,
                    is_valid: true,
                    erase_count: 7,
                    rwp: 0xabc,
                },
                Block {
                    index: 1,
                    is_valid: true,
                    erase_count: 9,
                    rwp: 0,
                },
                Block {
                    index: 2,
                    is_valid: false,
                    erase_count: 0,
                    rwp: 0,
                },
            ]
        );
    }

    #[test]
    fn test_scan_rh850() {
        let mut img = TestImage::new(3, 0x800);
        testimg::rh850_header(&mut img, 0, 3, 0);
        testimg::rh850_header(&mut img, 1, 4, 0x38);
        // A header whose checksummed counter field does not sum to 0xFF is
        // not an active block.
        testimg::rh850_header(&mut img, 2, 5, 0);
        let counter_field = img.base(2) as usize + 0x10;
        img.bytes[counter_field] ^= 0x01;
        let image = img.into_image();

        let catalog = scan_blocks(&image, Family::Rh850);
        assert!(catalog[0].is_valid && catalog[1].is_valid);
        assert!(!catalog[2].is_valid);
        assert_eq!(catalog[0].erase_count, 3);
        assert_eq!(catalog[0].rwp, 0x38);
        assert_eq!(catalog[1].rwp, 0);
    }

    #[test]
    fn test_rwp_registration_bounds() {
        let mut img = TestImage::new(2, 0x800);
        testimg::rh850_header(&mut img, 0, 1, 0x1000);
        testimg::rh850_header(&mut img, 1, 2, 0);
        let image = img.into_image();

        // 0x1000 lies past the end of this 0x1000-byte image, so nothing
        // gets registered.
        let catalog = scan_blocks(&image, Family::Rh850);
        assert_eq!(catalog[0].rwp, 0);
        assert_eq!(catalog[1].rwp, 0);
    }

    #[test]
    fn test_erase_order() {
        let blocks = [(2, true), (1, true), (1, true), (0, false), (2, true)];
        let catalog: Catalog = blocks
            .iter()
            .enumerate()
            .map(|(index, &(erase_count, is_valid))| Block {
                index,
                is_valid,
                erase_count,
                rwp: 0,
            })
            .collect();

        assert_eq!(erase_order(&catalog), [1, 2, 0, 4]);
    }
}
