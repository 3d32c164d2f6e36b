use byteorder::{ReadBytesExt, LE};
use thiserror::Error;
use fehler::{throw, throws};

use crate::ErrorKind;
use super::compress::MINMATCH;

/// Errors when decoding a raw LZ4 block.
#[derive(Error, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DecodeError {
    /// Expected more bytes, but found none.
    /// Either your input was truncated or you're trying to decompress garbage.
    #[error("the block ended in the middle of a sequence")]
    UnexpectedEnd,
    /// The offset for a deduplication is out of bounds.
    /// This may be caused by a missing or incomplete dictionary.
    #[error("back-reference offset {0} is out of bounds")]
    InvalidDeduplicationOffset(usize),
    /// A literal run or match length does not fit into memory.
    #[error("a length field overflowed")]
    LengthOverflow,
    /// Decoding would produce more than the caller allowed.
    #[error("the block decompresses to more than {0} bytes")]
    OutputTooLarge(usize),
    /// A size-prefixed block is shorter than its prefix.
    #[error("the block is missing its size prefix")]
    MissingSizePrefix,
}
type Error = DecodeError;

impl DecodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecodeError::OutputTooLarge(_) => ErrorKind::Capacity,
            _ => ErrorKind::Corruption,
        }
    }
}

/// This is how LZ4 encodes varints.
/// Just keep reading and adding while it's all F
#[throws]
fn read_lsic(initial: u8, reader: &mut &[u8]) -> usize {
    let mut value = initial as usize;
    if value == 0xF {
        loop {
            let more = reader.read_u8().map_err(|_| Error::UnexpectedEnd)?;
            value = value.checked_add(more as usize).ok_or(Error::LengthOverflow)?;
            if more != 0xFF {
                break;
            }
        }
    }
    value
}

/// Decompress an LZ4-compressed block.
///
/// Note that LZ4 heavily relies on a lookback mechanism where bytes earlier in the output stream are referenced.
/// You may either pre-initialize the output buffer with this data or pass it separately in `prefix`.
/// In particular, an LZ4 "dictionary" should (probably) be implemented as a `prefix` because you obviously
/// don't want the dictionary to appear at the beginning of the output.
///
/// At most `limit` bytes are appended to `output`. If the block would produce more, decoding fails
/// with [`DecodeError::OutputTooLarge`]. On any error, `output` may contain a partially decoded block.
///
/// This function is based around memory buffers because that's what LZ4 intends.
/// If your blocks don't fit in your memory, you should use smaller blocks.
#[throws]
pub fn decompress_raw(input: &[u8], prefix: &[u8], output: &mut Vec<u8>, limit: usize) {
    let mut reader = input;
    let start = output.len();
    let room = |output: &Vec<u8>, wanted: usize| -> Result<(), Error> {
        match (output.len() - start).checked_add(wanted) {
            Some(total) if total <= limit => Ok(()),
            _ => Err(Error::OutputTooLarge(limit)),
        }
    };

    loop {
        let token = match reader.read_u8() {
            Ok(x) => x,
            _ => break,
        };

        // read literals
        let literal_length = read_lsic(token >> 4, &mut reader)?;
        if literal_length > reader.len() {
            throw!(Error::UnexpectedEnd);
        }
        room(output, literal_length)?;
        output.extend_from_slice(&reader[..literal_length]);
        reader = &reader[literal_length..];

        // the last sequence has no match
        if reader.is_empty() {
            break;
        }

        // read duplicates
        let offset = reader.read_u16::<LE>().map_err(|_| Error::UnexpectedEnd)? as usize;
        let match_len = read_lsic(token & 0xF, &mut reader)?
            .checked_add(MINMATCH)
            .ok_or(Error::LengthOverflow)?;
        room(output, match_len)?;
        copy_overlapping(offset, match_len, prefix, output)?;
    }
}

/// Append `match_len` bytes starting `offset` bytes before the end of `output`.
///
/// Source and destination may overlap (`offset < match_len`), in which case later bytes
/// repeat bytes written by this very copy.
#[throws]
fn copy_overlapping(
    offset: usize,
    match_len: usize,
    prefix: &[u8],
    output: &mut Vec<u8>,
) {
    let old_len = output.len();
    match offset {
        0 => throw!(Error::InvalidDeduplicationOffset(0)),
        i if i > old_len => {
            // need prefix for this
            let prefix_needed = i - old_len;
            if prefix_needed > prefix.len() {
                throw!(Error::InvalidDeduplicationOffset(offset));
            }
            let how_many_bytes_from_prefix = std::cmp::min(prefix_needed, match_len);
            output.extend_from_slice(
                &prefix[prefix.len() - prefix_needed..][..how_many_bytes_from_prefix],
            );
            let remaining_len = match_len - how_many_bytes_from_prefix;
            if remaining_len != 0 {
                // offset stays the same because our cursor moved forward by the amount of bytes we took from prefix
                copy_overlapping(offset, remaining_len, &[], output)?;
            }
        }

        // fastpath: memset if we repeat the same byte forever
        1 => output.resize(old_len + match_len, output[old_len - 1]),

        o if match_len <= o => {
            // fastpath: nonoverlapping
            // for borrowck reasons we have to extend with zeroes first and then memcpy
            // instead of simply using extend_from_slice
            output.resize(old_len + match_len, 0);
            let (head, tail) = output.split_at_mut(old_len);
            tail.copy_from_slice(&head[old_len - offset..][..match_len]);
        }
        2 | 4 | 8 => {
            // fastpath: overlapping but small

            // speedup: build 16 byte buffer so we can handle 16 bytes each iteration instead of one
            let mut buf = [0u8; 16];
            for chunk in buf.chunks_mut(offset) {
                // offset always divides 16 here
                chunk.copy_from_slice(&output[old_len - offset..][..offset]);
            }
            // fill with zero bytes
            output.resize(old_len + match_len, 0);
            // copy buf as often as possible
            for target in output[old_len..].chunks_mut(buf.len()) {
                target.copy_from_slice(&buf[..target.len()]);
            }
        }
        _ => {
            // slowest path: copy single bytes, front to back
            output.reserve(match_len);
            for i in 0..match_len {
                let b = output[old_len - offset + i];
                output.push(b);
            }
        }
    }
}

/// Decompress all bytes of `input`, without any limit on the output size.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>, Error> {
    // Allocate a vector to contain the decompressed stream.
    let mut vec = Vec::new();
    decompress_raw(input, &[], &mut vec, usize::MAX)?;
    Ok(vec)
}
