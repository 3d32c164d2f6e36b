//! Single-slot hash tables for the fast match finder.
//!
//! Every slot remembers the most recent position whose leading bytes hashed to it.
//! Entries are plain indices, never references, and are allowed to go stale:
//! the compressor always confirms a candidate by comparing the actual bytes.

use std::mem;
use byteorder::{ByteOrder, NativeEndian};
use cfg_if::cfg_if;

/// Duplication dictionary size.
///
/// Every four bytes is assigned an entry. When this number is lower, fewer entries exists, and
/// thus collisions are more likely, hurting the compression ratio.
const DICTIONARY_SIZE: usize = 1 << HASHLOG;
const HASHLOG: usize = 12;

/// Once the accumulated shift grows past this, stored positions are rewritten
/// so they keep fitting into the table's integer type on unbounded streams.
const REBASE_THRESHOLD: usize = 1 << 30;

pub trait EncoderTable {
    fn payload_size_limit() -> usize;

    /// Store `offset` as the newest position for the bytes at `input[offset..]`
    /// and return the position previously stored in that slot.
    ///
    /// The lookup happens before the insert, so a position is never returned for itself.
    // offset is declared as usize but must not be above payload_size_limit
    fn replace(&mut self, input: &[u8], offset: usize) -> usize;
}

cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        // on 64 bit systems, we read 64 bits and hash 5 bytes instead of 4
        fn hash_for_u32(input: &[u8]) -> usize {
            // read 64 bits if possible
            let v = input.get(..8).map(NativeEndian::read_u64).unwrap_or(0);
            // we end up only needing 5 bytes but the only case where this becomes
            // zero is at the very end, where we're not allowed to produce matches anyway

            // calculate a bad but very cheap checksum
            #[cfg(target_endian = "little")]
            let v = (v << 24).wrapping_mul(889523592379);
            #[cfg(target_endian = "big")]
            let v = (v >> 24).wrapping_mul(11400714785074694791);

            (v >> (64 - HASHLOG)) as usize
        }
    } else {
        // on all other systems we simply hash 4 bytes, borrowing the algorithm for the u16 table
        fn hash_for_u32(input: &[u8]) -> usize {
            hash_for_u16(input) >> 1 // shift by one more because we have half as many slots as the u16 table
        }
    }
}

fn hash_for_u16(input: &[u8]) -> usize {
    let v = input.get(..4).map(NativeEndian::read_u32).unwrap_or(0);
    (v.wrapping_mul(2654435761) >> (32 - HASHLOG - 1)) as usize // shift by one less than hashlog because we have twice as many slots
}

/// Table for inputs of any size, including streams of linked blocks.
#[derive(Clone)]
pub struct U32Table {
    dict: [u32; DICTIONARY_SIZE],
    offset: usize,
}
impl Default for U32Table {
    fn default() -> Self {
        U32Table { dict: [0; DICTIONARY_SIZE], offset: 0 }
    }
}

impl EncoderTable for U32Table {
    fn replace(&mut self, input: &[u8], offset: usize) -> usize {
        let o = offset + self.offset; // apply positive offset on input
        debug_assert!(o <= u32::MAX as usize, "EncoderTable contract violated");

        let mut value = o as u32;
        mem::swap(&mut self.dict[hash_for_u32(&input[offset..])], &mut value);
        (value as usize).saturating_sub(self.offset) // apply negative offset on output
    }
    fn payload_size_limit() -> usize { u32::MAX as usize - REBASE_THRESHOLD }
}

impl U32Table {
    /// The input buffer lost `offset` bytes at its front; shift all positions accordingly.
    pub fn offset(&mut self, offset: usize) {
        self.offset += offset;
        if self.offset > REBASE_THRESHOLD {
            let shift = self.offset as u32;
            for slot in self.dict.iter_mut() {
                *slot = slot.saturating_sub(shift);
            }
            self.offset = 0;
        }
    }
}

/// Table for inputs up to 64 KiB.
#[derive(Clone)]
pub struct U16Table {
    dict: [u16; DICTIONARY_SIZE*2], // u16 fits twice as many slots into the same amount of memory
}
impl Default for U16Table {
    fn default() -> Self {
        U16Table { dict: [0; DICTIONARY_SIZE*2] }
    }
}
impl EncoderTable for U16Table {
    fn replace(&mut self, input: &[u8], offset: usize) -> usize {
        debug_assert!(offset <= u16::MAX as usize, "EncoderTable contract violated");

        let mut value = offset as u16;
        mem::swap(&mut self.dict[hash_for_u16(&input[offset..])], &mut value);
        value as usize
    }
    fn payload_size_limit() -> usize { u16::MAX as usize }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_returns_previous_occupant() {
        let input = b"abcdefghabcdefghabcdefgh";
        let mut table = U32Table::default();
        table.replace(input, 0);
        assert_eq!(table.replace(input, 8), 0);
        assert_eq!(table.replace(input, 16), 8);
    }

    #[test]
    fn offset_shifts_positions() {
        let input = b"abcdefghabcdefghabcdefgh";
        let mut table = U32Table::default();
        table.replace(input, 8);
        table.offset(4);
        // position 8 is now position 4 from the table's point of view
        assert_eq!(table.replace(&input[4..], 12), 4);
    }

    #[test]
    fn rebase_keeps_recent_positions() {
        let input = b"abcdefghabcdefghabcdefgh";
        let mut table = U32Table::default();
        table.offset(REBASE_THRESHOLD);
        table.replace(input, 8);
        table.offset(8); // crosses the threshold and rebases
        assert_eq!(table.offset, 0);
        assert_eq!(table.replace(&input[8..], 8), 0);
    }

    #[test]
    fn u16_table() {
        let input = b"xyzwxyzwxyzw";
        let mut table = U16Table::default();
        table.replace(input, 0);
        assert_eq!(table.replace(input, 4), 0);
        assert_eq!(table.replace(input, 8), 4);
    }
}
