//! xxHash32 checksums as used by the LZ4 frame format.
//!
//! The frame format uses the same hash (always with seed 0) in three places:
//! the header checksum byte, the optional per-block checksum and the optional
//! content checksum over the decompressed data.

use std::hash::Hasher;
use twox_hash::XxHash32;

/// Incremental xxHash32 accumulator.
///
/// Feeding data in pieces yields exactly the same result as feeding it all at once,
/// so this can be carried across any number of chunks of a stream.
#[derive(Clone)]
pub struct Checksum(XxHash32);

impl Checksum {
    pub fn new() -> Self {
        Checksum(XxHash32::with_seed(0))
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.write(data);
    }

    /// The hash of everything fed so far. Does not reset the accumulator.
    pub fn finish(&self) -> u32 {
        self.0.finish() as u32
    }
}

impl Default for Checksum {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot xxHash32 of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Checksum::new();
    hasher.update(data);
    hasher.finish()
}

/// The header checksum byte: second byte of the xxHash32 over the descriptor
/// (everything after the magic number, up to but excluding the checksum itself).
pub fn header_checksum(descriptor: &[u8]) -> u8 {
    (checksum(descriptor) >> 8) as u8
}
