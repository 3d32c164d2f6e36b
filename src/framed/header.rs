#![allow(non_upper_case_globals)]

use byteorder::{ByteOrder, LE};
use thiserror::Error;
use fehler::{throw, throws};
use bitflags::bitflags;

use super::MAGIC;
use crate::checksum::header_checksum;

bitflags! {
    pub struct Flags: u8 {
        const IndependentBlocks = 0b00100000;
        const BlockChecksums    = 0b00010000;
        const ContentSize       = 0b00001000;
        const ContentChecksum   = 0b00000100;
        const DictionaryId      = 0b00000001;
    }
}

const VERSION: u8 = 1;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("block size class {0} is reserved")]
    UnimplementedBlocksize(u8),
    #[error("file version {0} not supported")]
    UnsupportedVersion(u8),
    #[error("reserved bits in flags set")]
    ReservedFlagBitsSet,
    #[error("reserved bits in bd set")]
    ReservedBdBitsSet,
}

impl ParseError {
    pub fn kind(&self) -> crate::ErrorKind {
        crate::ErrorKind::Format
    }
}

impl Flags {
    #[throws(ParseError)]
    pub fn parse(i: u8) -> Self {
        let version = i >> 6;
        if version != VERSION {
            throw!(ParseError::UnsupportedVersion(version));
        }
        if (i & 0b10) != 0 {
            throw!(ParseError::ReservedFlagBitsSet);
        }

        Flags::from_bits_truncate(i)
    }

    /// The FLG byte, including the version bits.
    pub fn to_byte(self) -> u8 {
        (VERSION << 6) | self.bits()
    }

    pub fn independent_blocks(&self) -> bool { self.contains(Flags::IndependentBlocks) }
    pub fn block_checksums(&self)    -> bool { self.contains(Flags::BlockChecksums) }
    pub fn content_size(&self)       -> bool { self.contains(Flags::ContentSize) }
    pub fn content_checksum(&self)   -> bool { self.contains(Flags::ContentChecksum) }
    pub fn dictionary_id(&self)      -> bool { self.contains(Flags::DictionaryId) }

    /// Length of the optional descriptor fields these flags announce.
    pub fn optional_fields_len(&self) -> usize {
        let mut len = 0;
        if self.content_size() {
            len += 8;
        }
        if self.dictionary_id() {
            len += 4;
        }
        len
    }
}

/// The four maximum block sizes a frame can declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockSize {
    Max64KB = 4,
    Max256KB = 5,
    Max1MB = 6,
    Max4MB = 7,
}

impl BlockSize {
    pub fn bytes(self) -> usize {
        1 << (self as usize * 2 + 8)
    }

    /// The block size class for exactly `bytes`, if it is one of the four valid sizes.
    pub fn from_bytes(bytes: usize) -> Option<Self> {
        [BlockSize::Max64KB, BlockSize::Max256KB, BlockSize::Max1MB, BlockSize::Max4MB]
            .iter()
            .copied()
            .find(|size| size.bytes() == bytes)
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        BlockSize::Max4MB
    }
}

/// The BD byte of the frame descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockDescriptor(pub u8);
impl BlockDescriptor {
    pub fn new(size: BlockSize) -> Self {
        BlockDescriptor((size as u8) << 4)
    }

    #[throws(ParseError)]
    pub fn parse(i: u8) -> Self {
        if (i & 0b10001111) != 0 {
            throw!(ParseError::ReservedBdBitsSet);
        }
        BlockDescriptor(i)
    }

    #[throws(ParseError)]
    pub fn block_size(&self) -> BlockSize {
        match (self.0 >> 4) & 0b111 {
            4 => BlockSize::Max64KB,
            5 => BlockSize::Max256KB,
            6 => BlockSize::Max1MB,
            7 => BlockSize::Max4MB,
            size => throw!(ParseError::UnimplementedBlocksize(size)),
        }
    }

    #[throws(ParseError)]
    pub fn block_maxsize(&self) -> usize {
        self.block_size()?.bytes()
    }
}

/// Everything the frame header says about a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub block_size: BlockSize,
    pub independent_blocks: bool,
    pub block_checksums: bool,
    pub content_checksum: bool,
    pub content_size: Option<u64>,
    pub dictionary_id: Option<u32>,
}

impl Default for FrameInfo {
    fn default() -> Self {
        FrameInfo {
            block_size: BlockSize::default(),
            independent_blocks: true,
            block_checksums: false,
            content_checksum: false,
            content_size: None,
            dictionary_id: None,
        }
    }
}

impl FrameInfo {
    pub fn flags(&self) -> Flags {
        let mut flags = Flags::empty();
        flags.set(Flags::IndependentBlocks, self.independent_blocks);
        flags.set(Flags::BlockChecksums, self.block_checksums);
        flags.set(Flags::ContentChecksum, self.content_checksum);
        flags.set(Flags::ContentSize, self.content_size.is_some());
        flags.set(Flags::DictionaryId, self.dictionary_id.is_some());
        flags
    }

    /// Append magic number, descriptor and header checksum to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.push(self.flags().to_byte());
        out.push(BlockDescriptor::new(self.block_size).0);
        if let Some(content_size) = self.content_size {
            out.extend_from_slice(&content_size.to_le_bytes());
        }
        if let Some(id) = self.dictionary_id {
            out.extend_from_slice(&id.to_le_bytes());
        }
        let checksum = header_checksum(&out[start + 4..]); // skip magic for header checksum
        out.push(checksum);
    }

    /// Rebuild the frame info from the descriptor bytes following the magic number
    /// (FLG, BD and the optional fields, without the checksum byte).
    #[throws(ParseError)]
    pub fn from_descriptor(descriptor: &[u8]) -> Self {
        let flags = Flags::parse(descriptor[0])?;
        let bd = BlockDescriptor::parse(descriptor[1])?;
        let mut optional = &descriptor[2..];

        let content_size = if flags.content_size() {
            let size = LE::read_u64(optional);
            optional = &optional[8..];
            Some(size)
        } else {
            None
        };
        let dictionary_id = if flags.dictionary_id() {
            Some(LE::read_u32(optional))
        } else {
            None
        };

        FrameInfo {
            block_size: bd.block_size()?,
            independent_blocks: flags.independent_blocks(),
            block_checksums: flags.block_checksums(),
            content_checksum: flags.content_checksum(),
            content_size,
            dictionary_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags() {
        let flags = Flags::parse(0x64).unwrap();
        assert!(flags.independent_blocks());
        assert!(flags.content_checksum());
        assert!(!flags.block_checksums());
        assert_eq!(flags.to_byte(), 0x64);

        assert_eq!(Flags::parse(0x24).unwrap_err(), ParseError::UnsupportedVersion(0));
        assert_eq!(Flags::parse(0x66).unwrap_err(), ParseError::ReservedFlagBitsSet);
    }

    #[test]
    fn block_descriptor() {
        assert_eq!(BlockDescriptor::new(BlockSize::Max64KB).0, 0x40);
        assert_eq!(BlockDescriptor::new(BlockSize::Max4MB).0, 0x70);
        assert_eq!(BlockDescriptor::parse(0x50).unwrap().block_maxsize().unwrap(), 256 * 1024);
        assert_eq!(BlockDescriptor::parse(0x41).unwrap_err(), ParseError::ReservedBdBitsSet);
        assert_eq!(BlockDescriptor::parse(0xC0).unwrap_err(), ParseError::ReservedBdBitsSet);
        assert_eq!(BlockDescriptor::parse(0x30).unwrap().block_size().unwrap_err(), ParseError::UnimplementedBlocksize(3));
    }

    #[test]
    fn block_sizes() {
        assert_eq!(BlockSize::Max64KB.bytes(), 64 * 1024);
        assert_eq!(BlockSize::Max256KB.bytes(), 256 * 1024);
        assert_eq!(BlockSize::Max1MB.bytes(), 1024 * 1024);
        assert_eq!(BlockSize::Max4MB.bytes(), 4 * 1024 * 1024);
        assert_eq!(BlockSize::from_bytes(1024 * 1024), Some(BlockSize::Max1MB));
        assert_eq!(BlockSize::from_bytes(1000), None);
    }

    #[test]
    fn header_roundtrip() {
        let info = FrameInfo {
            block_size: BlockSize::Max256KB,
            independent_blocks: false,
            block_checksums: true,
            content_checksum: true,
            content_size: Some(123_456_789),
            dictionary_id: Some(42),
        };
        let mut out = Vec::new();
        info.write(&mut out);
        assert_eq!(out.len(), 4 + 2 + 8 + 4 + 1);
        assert_eq!(LE::read_u32(&out), MAGIC);
        assert_eq!(FrameInfo::from_descriptor(&out[4..out.len() - 1]).unwrap(), info);
        assert_eq!(out[out.len() - 1], header_checksum(&out[4..out.len() - 1]));
    }

    #[test]
    fn minimal_header() {
        let info = FrameInfo { block_size: BlockSize::Max64KB, content_checksum: true, ..FrameInfo::default() };
        let mut out = Vec::new();
        info.write(&mut out);
        assert_eq!(out, [0x04, 0x22, 0x4D, 0x18, 0x64, 0x40, 0xA7]);
    }
}
