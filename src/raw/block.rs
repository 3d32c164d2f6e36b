//! Single-shot block compression with caller-chosen limits.

use byteorder::{ByteOrder, LE};
use thiserror::Error;
use fehler::{throw, throws};

use crate::ErrorKind;
use crate::window::dictionary_tail;
use super::compress::{BlockEncoder, NoPartialWrites, Strategy, DEFAULT_LEVEL};
use super::decompress::{decompress_raw, DecodeError};

/// Largest input the block format supports.
pub const MAX_INPUT_SIZE: usize = 0x7E00_0000;

/// Size of the optional uncompressed-size prefix.
const SIZE_PREFIX_LEN: usize = 4;

/// Errors when compressing a raw block.
#[derive(Error, Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockError {
    #[error("input of {0} bytes exceeds the block format's limit")]
    InputTooLarge(usize),
    #[error("compressed block does not fit into {0} bytes")]
    OutputTooSmall(usize),
}

impl BlockError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Capacity
    }
}

/// Worst-case size of a compressed block for `input_len` bytes of input.
pub const fn compress_bound(input_len: usize) -> usize {
    input_len + input_len / 255 + 16
}

/// A builder-style struct that configures raw block compression.
///
/// Create it using `Default::default()`.
#[derive(Clone, Debug)]
pub struct BlockSettings<'a> {
    compression_level: i32,
    dictionary: Option<&'a [u8]>,
    store_size: bool,
}

impl<'a> Default for BlockSettings<'a> {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_LEVEL,
            dictionary: None,
            store_size: false,
        }
    }
}

impl<'a> BlockSettings<'a> {
    /// See [`Strategy::from_level`]. The default is 0.
    pub fn compression_level(&mut self, level: i32) -> &mut Self {
        self.compression_level = level;
        self
    }

    /// Let the block reference the trailing 64 KiB of `dict`.
    /// The same dictionary has to be supplied for decompression.
    pub fn dictionary(&mut self, dict: &'a [u8]) -> &mut Self {
        self.dictionary = Some(dict);
        self
    }

    /// Prefix the block with its uncompressed size as a 4-byte little-endian integer,
    /// so it can be decompressed with [`decompress_sized`] without knowing the size.
    ///
    /// Disabled by default.
    pub fn store_size(&mut self, v: bool) -> &mut Self {
        self.store_size = v;
        self
    }

    /// Compress `input` into a block no larger than `max_output_size` (including the size prefix, if any).
    #[throws(BlockError)]
    pub fn compress(&self, input: &[u8], max_output_size: usize) -> Vec<u8> {
        if input.len() > MAX_INPUT_SIZE {
            throw!(BlockError::InputTooLarge(input.len()));
        }

        let header_len = if self.store_size { SIZE_PREFIX_LEN } else { 0 };
        let capacity = max_output_size.min(compress_bound(input.len()) + header_len);
        if capacity < header_len {
            throw!(BlockError::OutputTooSmall(max_output_size));
        }

        let mut output = vec![0u8; capacity];
        if self.store_size {
            LE::write_u32(&mut output[..SIZE_PREFIX_LEN], input.len() as u32);
        }

        let prefix = self.dictionary.map(dictionary_tail).unwrap_or(&[]);
        let mut encoder = BlockEncoder::new(Strategy::from_level(self.compression_level));
        let remaining = {
            let mut writer = NoPartialWrites(&mut output[header_len..]);
            let result = if prefix.is_empty() {
                encoder.compress(input, 0, &mut writer)
            } else {
                let mut window = Vec::with_capacity(prefix.len() + input.len());
                window.extend_from_slice(prefix);
                window.extend_from_slice(input);
                encoder.prime(prefix);
                encoder.compress(&window, prefix.len(), &mut writer)
            };
            if result.is_err() {
                throw!(BlockError::OutputTooSmall(max_output_size));
            }
            writer.0.len()
        };

        output.truncate(capacity - remaining);
        output
    }
}

/// Compress `input` with default settings into at most `max_output_size` bytes.
pub fn compress_block(input: &[u8], max_output_size: usize) -> Result<Vec<u8>, BlockError> {
    BlockSettings::default().compress(input, max_output_size)
}

/// Decompress a block that is known to expand to at most `expected_output_size` bytes.
pub fn decompress_block(input: &[u8], expected_output_size: usize) -> Result<Vec<u8>, DecodeError> {
    decompress_block_with_dict(input, &[], expected_output_size)
}

/// Like [`decompress_block`], for blocks compressed against a dictionary.
#[throws(DecodeError)]
pub fn decompress_block_with_dict(input: &[u8], dict: &[u8], expected_output_size: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(initial_capacity(input.len(), expected_output_size));
    decompress_raw(input, dictionary_tail(dict), &mut output, expected_output_size)?;
    output
}

/// Output space worth reserving up front: a single input byte can expand to at most 255 output bytes.
fn initial_capacity(input_len: usize, expected_output_size: usize) -> usize {
    expected_output_size.min(input_len.saturating_mul(255).saturating_add(16))
}

/// Decompress a block written with [`BlockSettings::store_size`].
#[throws(DecodeError)]
pub fn decompress_sized(input: &[u8], dict: &[u8]) -> Vec<u8> {
    if input.len() < SIZE_PREFIX_LEN {
        throw!(DecodeError::MissingSizePrefix);
    }
    let size = LE::read_u32(&input[..SIZE_PREFIX_LEN]) as usize;
    let output = decompress_block_with_dict(&input[SIZE_PREFIX_LEN..], dict, size)?;
    if output.len() != size {
        throw!(DecodeError::UnexpectedEnd);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        b"It was the best of times, it was the worst of times, it was the age of wisdom, \
          it was the age of foolishness, it was the epoch of belief, it was the epoch of incredulity"
            .to_vec()
    }

    #[test]
    fn roundtrip() {
        let input = sample();
        let compressed = compress_block(&input, compress_bound(input.len())).unwrap();
        assert!(compressed.len() < input.len());
        assert_eq!(decompress_block(&compressed, input.len()).unwrap(), input);
    }

    #[test]
    fn hello_world() {
        let compressed = compress_block(b"Hello, world!", 64).unwrap();
        assert_eq!(decompress_block(&compressed, 13).unwrap(), b"Hello, world!");
    }

    #[test]
    fn output_limit() {
        let input = sample();
        assert_eq!(compress_block(&input, 10).unwrap_err(), BlockError::OutputTooSmall(10));
        assert_eq!(compress_block(&input, 10).unwrap_err().kind(), ErrorKind::Capacity);

        let compressed = compress_block(&input, 1000).unwrap();
        assert_eq!(
            decompress_block(&compressed, input.len() - 1).unwrap_err(),
            DecodeError::OutputTooLarge(input.len() - 1)
        );
    }

    #[test]
    fn incompressible_stays_within_bound() {
        let input: Vec<u8> = (0..10_000u32).map(|i| (i.wrapping_mul(2654435761) >> 11) as u8).collect();
        let compressed = compress_block(&input, usize::MAX).unwrap();
        assert!(compressed.len() <= compress_bound(input.len()));
        assert_eq!(decompress_block(&compressed, input.len()).unwrap(), input);
    }

    #[test]
    fn size_prefix() {
        let input = sample();
        let compressed = BlockSettings::default()
            .store_size(true)
            .compress(&input, usize::MAX)
            .unwrap();
        assert_eq!(LE::read_u32(&compressed), input.len() as u32);
        assert_eq!(decompress_sized(&compressed, &[]).unwrap(), input);
        assert_eq!(decompress_sized(&compressed[..3], &[]).unwrap_err(), DecodeError::MissingSizePrefix);
    }

    #[test]
    fn size_prefix_does_not_drive_allocation() {
        // claims 2 GiB, decodes to nothing
        let garbage = [0xFF, 0xFF, 0xFF, 0x7F, 0x00];
        assert_eq!(decompress_sized(&garbage, &[]).unwrap_err(), DecodeError::UnexpectedEnd);
        assert_eq!(initial_capacity(1, 0x7FFF_FFFF), 255 + 16);
        assert_eq!(initial_capacity(1000, 13), 13);
        assert_eq!(initial_capacity(usize::MAX, usize::MAX), usize::MAX);
    }

    #[test]
    fn dictionary() {
        let dict = sample();
        let input = b"it was the age of wisdom, it was the epoch of belief".to_vec();
        let with_dict = BlockSettings::default()
            .dictionary(&dict)
            .compress(&input, usize::MAX)
            .unwrap();
        let without = compress_block(&input, usize::MAX).unwrap();
        assert!(with_dict.len() < without.len());

        assert_eq!(decompress_block_with_dict(&with_dict, &dict, input.len()).unwrap(), input);
        assert!(decompress_block(&with_dict, input.len()).is_err());
    }

    #[test]
    fn high_compression_level() {
        let input = sample().repeat(20);
        let compressed = BlockSettings::default()
            .compression_level(9)
            .compress(&input, usize::MAX)
            .unwrap();
        assert_eq!(decompress_block(&compressed, input.len()).unwrap(), input);
    }
}
