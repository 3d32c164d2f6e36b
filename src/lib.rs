//! LZ4 compression: the raw block codec and the streaming frame format.
//!
//! Most users want [`framed`]: [`CompressionSettings`](framed::CompressionSettings) compresses a
//! `Read` into a `Write` or hands out a [`FrameEncoder`](framed::FrameEncoder) for push-style
//! streaming, and [`FrameDecoder`](framed::FrameDecoder) / [`decompress_frame`](framed::decompress_frame)
//! undo it. Frames are compatible with the `lz4` command line tool.
//!
//! [`raw`] exposes single blocks without any framing, and [`api`] bundles the small
//! context-style surface that bindings build on.
//!
//! All state lives in explicit encoder/decoder values. Nothing is shared between them, so
//! independent streams can be processed on as many threads as you like.

#![forbid(unsafe_code)]

pub mod api;
pub mod checksum;
pub mod framed;
pub mod raw;
pub mod window;

pub use framed::{
    decompress_frame, get_frame_info, BlockSize, CompressionError, CompressionSettings, DecompressionError,
    FrameDecoder, FrameEncoder, FrameInfo, LZ4FrameReader,
};

/// Broad classification of everything that can go wrong, shared by all error types in this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Not an LZ4 frame, or a header this implementation does not understand.
    Format,
    /// The data is damaged: checksum mismatches, impossible back-references, truncation.
    Corruption,
    /// Something does not fit: output limits, oversized blocks or inputs.
    Capacity,
    /// The API was used out of order, e.g. compressing after finishing.
    Sequence,
    /// The caller's reader or writer failed.
    Io,
}
