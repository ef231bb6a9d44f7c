//! The dataflash image: a flat dump carved into fixed-size erasable blocks.

use thiserror::Error;

use crate::codec::{self, OutOfRange};

/// Rejected dump geometry.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryError {
    #[error("block size must not be zero")]
    ZeroBlockSize,
    #[error("dataflash image is empty")]
    Empty,
    #[error("image length {len:#x} is not a multiple of the {block_size:#x}-byte block size")]
    NotBlockMultiple { len: usize, block_size: usize },
}

/// An immutable dataflash dump.
///
/// Construction checks geometry only; whether a block actually carries an
/// active header is the catalog's concern.
#[derive(Debug, Clone)]
pub struct DataflashImage {
    bytes: Box<[u8]>,
    block_size: usize,
}

impl DataflashImage {
    /// Wrap a raw dump whose length is a positive multiple of `block_size`.
    pub fn new(bytes: impl Into<Vec<u8>>, block_size: usize) -> Result<Self, GeometryError> {
        let bytes = bytes.into();
        if block_size == 0 {
            return Err(GeometryError::ZeroBlockSize);
        }
        if bytes.is_empty() {
            return Err(GeometryError::Empty);
        }
        if bytes.len() % block_size != 0 {
            return Err(GeometryError::NotBlockMultiple {
                len: bytes.len(),
                block_size,
            });
        }
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
            block_size,
        })
    }

    /// Size of one erasable block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of whole blocks in the image.
    pub fn block_count(&self) -> usize {
        self.bytes.len() / self.block_size
    }

    /// The whole dump.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// One block's window into the dump.
    ///
    /// Panics if `index` is not below [`block_count`](Self::block_count).
    pub fn block_bytes(&self, index: usize) -> &[u8] {
        &self.bytes[index * self.block_size..][..self.block_size]
    }

    /// Absolute byte address of the start of a block.
    pub fn block_base(&self, index: usize) -> u32 {
        (index * self.block_size) as u32
    }

    /// Read the little-endian word at an absolute image address.
    pub fn word_le(&self, address: u32) -> Result<u32, OutOfRange> {
        codec::word_le(&self.bytes, address as usize)
    }
}

#[test]
fn test_geometry() {
    assert_eq!(
        DataflashImage::new(vec![], 0x800).unwrap_err(),
        GeometryError::Empty
    );
    assert_eq!(
        DataflashImage::new(vec![0xff; 0x801], 0x800).unwrap_err(),
        GeometryError::NotBlockMultiple {
            len: 0x801,
            block_size: 0x800,
        }
    );
    assert_eq!(
        DataflashImage::new(vec![0xff; 0x800], 0).unwrap_err(),
        GeometryError::ZeroBlockSize
    );
}

#[test]
fn test_addressing() -> anyhow::Result<()> {
    let image = DataflashImage::new(vec![0xff; 0x2000], 0x800)?;
    assert_eq!(image.block_count(), 4);
    assert_eq!(image.block_base(3), 0x1800);
    assert_eq!(image.block_bytes(1).len(), 0x800);
    assert_eq!(image.word_le(0x1ffc)?, 0xffff_ffff);
    assert!(image.word_le(0x1ffd).is_err());
    Ok(())
}
