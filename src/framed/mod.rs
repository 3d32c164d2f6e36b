//! The LZ4 frame format: a self-describing container around a sequence of blocks.
//!
//! A frame starts with a magic number and a descriptor, followed by any number of
//! (optionally checksummed) blocks, an end mark and an optional checksum over the
//! decompressed content.

use fehler::throws;

mod compress;
mod decompress;
mod header;

/// The four magic bytes at the start of every LZ4 frame.
pub const MAGIC: u32 = 0x184D2204;
/// The frame format sets the high bit of every length field to indicate that the data was not compressed.
const INCOMPRESSIBLE: u32 = 1 << 31;
/// Skippable frames use any magic number in this range.
const SKIPPABLE_MAGIC: std::ops::RangeInclusive<u32> = 0x184D2A50..=0x184D2A5F;

pub use compress::*;
pub use decompress::*;
pub use header::{BlockDescriptor, BlockSize, Flags, FrameInfo, ParseError};

/// Write a skippable frame: a frame that every decoder silently steps over.
///
/// `nibble` selects one of the sixteen skippable magic numbers.
#[throws(CompressionError)]
pub fn write_skippable_frame(nibble: u8, payload: &[u8], out: &mut Vec<u8>) {
    let len = skippable_len(payload.len())?;
    out.extend_from_slice(&(SKIPPABLE_MAGIC.start() | u32::from(nibble & 0xF)).to_le_bytes());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
}

fn skippable_len(len: usize) -> Result<u32, CompressionError> {
    use std::convert::TryFrom;
    u32::try_from(len).map_err(|_| CompressionError::PayloadTooLarge(len))
}
