//! Context-style entry points for language bindings and other thin glue.
//!
//! These are plain functions over the encoder/decoder types of [`framed`](crate::framed) and the
//! block functions of [`raw`](crate::raw). A context is created once per stream, fed in order,
//! finished once and dropped (or reset) afterwards.

use crate::framed::{BlockSize, CompressionError, CompressionSettings, DecompressionError, FrameDecoder, FrameEncoder};
use crate::raw::{self, BlockError, DecodeError};

pub type CompressionContext<'a> = FrameEncoder<'a>;
pub type DecompressionContext<'a> = FrameDecoder<'a>;

/// Options recognized by [`create_compression_context`].
#[derive(Clone, Debug)]
pub struct CompressionOptions<'a> {
    pub block_size_class: BlockSize,
    pub enable_block_checksum: bool,
    pub enable_content_checksum: bool,
    /// Write `source_size` into the header (and check it at the end).
    pub enable_content_size: bool,
    pub source_size: u64,
    pub independent_blocks: bool,
    pub compression_level: i32,
    pub auto_flush: bool,
    /// Dictionary id and contents.
    pub dictionary: Option<(u32, &'a [u8])>,
}

impl<'a> Default for CompressionOptions<'a> {
    fn default() -> Self {
        CompressionOptions {
            block_size_class: BlockSize::Max64KB,
            enable_block_checksum: false,
            enable_content_checksum: true,
            enable_content_size: false,
            source_size: 0,
            independent_blocks: true,
            compression_level: 0,
            auto_flush: false,
            dictionary: None,
        }
    }
}

impl<'a> CompressionOptions<'a> {
    fn settings(&self) -> CompressionSettings<'a> {
        let mut settings = CompressionSettings::default();
        settings
            .block_size(self.block_size_class)
            .block_checksums(self.enable_block_checksum)
            .content_checksum(self.enable_content_checksum)
            .independent_blocks(self.independent_blocks)
            .compression_level(self.compression_level)
            .auto_flush(self.auto_flush);
        if let Some((id, dict)) = self.dictionary {
            settings.dictionary(id, dict);
        }
        settings
    }
}

pub fn create_compression_context<'a>(options: &CompressionOptions<'a>) -> Result<CompressionContext<'a>, CompressionError> {
    let settings = options.settings();
    if options.enable_content_size {
        Ok(settings.encoder_with_size(options.source_size))
    } else {
        settings.encoder()
    }
}

/// Compress a chunk. Returns whatever frame bytes became available (possibly none).
pub fn compress_update(context: &mut CompressionContext, input: &[u8]) -> Result<Vec<u8>, CompressionError> {
    context.update(input)
}

/// Finish the frame, returning the remaining bytes including the end mark.
pub fn compress_finish(context: &mut CompressionContext) -> Result<Vec<u8>, CompressionError> {
    context.finish()
}

pub fn create_decompression_context() -> DecompressionContext<'static> {
    FrameDecoder::new()
}

pub fn create_decompression_context_with_dictionary(dict: &[u8]) -> DecompressionContext {
    FrameDecoder::with_dictionary(dict)
}

/// Decompress a chunk of frame data. Returns the decompressed bytes and how much of `input` was consumed.
pub fn decompress_update(context: &mut DecompressionContext, input: &[u8]) -> Result<(Vec<u8>, usize), DecompressionError> {
    context.update(input)
}

/// Compress `input` into a single raw block of at most `max_output_size` bytes.
pub fn compress_block(input: &[u8], max_output_size: usize) -> Result<Vec<u8>, BlockError> {
    raw::compress_block(input, max_output_size)
}

/// Decompress a raw block that expands to at most `expected_output_size` bytes.
pub fn decompress_block(input: &[u8], expected_output_size: usize) -> Result<Vec<u8>, DecodeError> {
    raw::decompress_block(input, expected_output_size)
}
