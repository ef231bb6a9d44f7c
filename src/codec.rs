//! Word-level access to raw dump buffers.
//!
//! Everything in a dataflash dump is addressed by byte offset, so the
//! decoders work directly on `&[u8]` with bounds-checked 32-bit reads
//! rather than through layered readers.

use std::mem::size_of;

use thiserror::Error;

/// A word access that does not fit inside its buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{len}-byte access at {offset:#x} runs past the end of a {size:#x}-byte buffer")]
pub struct OutOfRange {
    /// Byte offset of the attempted access.
    pub offset: usize,
    /// Length of the attempted access.
    pub len: usize,
    /// Total length of the buffer.
    pub size: usize,
}

fn span(buf: &[u8], offset: usize, len: usize) -> Result<&[u8], OutOfRange> {
    let oob = OutOfRange {
        offset,
        len,
        size: buf.len(),
    };
    let end = offset.checked_add(len).ok_or(oob)?;
    buf.get(offset..end).ok_or(oob)
}

/// Read the little-endian 32-bit word at a byte offset.
pub fn word_le(buf: &[u8], offset: usize) -> Result<u32, OutOfRange> {
    let bytes = span(buf, offset, size_of::<u32>())?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

/// Read the big-endian 32-bit word at a byte offset.
pub fn word_be(buf: &[u8], offset: usize) -> Result<u32, OutOfRange> {
    let bytes = span(buf, offset, size_of::<u32>())?;
    Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
}

/// Store a 32-bit word little-endian at a byte offset.
pub fn put_word_le(buf: &mut [u8], offset: usize, value: u32) -> Result<(), OutOfRange> {
    let oob = OutOfRange {
        offset,
        len: size_of::<u32>(),
        size: buf.len(),
    };
    let end = offset.checked_add(size_of::<u32>()).ok_or(oob)?;
    buf.get_mut(offset..end)
        .ok_or(oob)?
        .copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Additive 8-bit checksum: the wrapping sum of every byte.
pub fn sum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |sum, byte| sum.wrapping_add(*byte))
}

#[test]
fn test_words() {
    let buf = [0x78, 0x56, 0x34, 0x12, 0xaa];
    assert_eq!(word_le(&buf, 0), Ok(0x1234_5678));
    assert_eq!(word_be(&buf, 0), Ok(0x7856_3412));
    assert_eq!(word_le(&buf, 1), Ok(0xaa12_3456));
    assert!(word_le(&buf, 2).is_err());
    assert_eq!(
        word_le(&buf, usize::MAX),
        Err(OutOfRange {
            offset: usize::MAX,
            len: 4,
            size: 5,
        })
    );
}

#[test]
fn test_put_word() {
    let mut buf = [0u8; 8];
    put_word_le(&mut buf, 2, 0xdead_beef).unwrap();
    assert_eq!(buf, [0, 0, 0xef, 0xbe, 0xad, 0xde, 0, 0]);
    assert!(put_word_le(&mut buf, 6, 0).is_err());
}

#[test]
fn test_sum8() {
    assert_eq!(sum8(&[]), 0);
    assert_eq!(sum8(&[0x12, 0x34]), 0x46);
    assert_eq!(sum8(&[0xff, 0xff, 0x02]), 0x00);
}
