//! The compression algorithm.
//!
//! We make use of hash tables to find duplicates. This gives a reasonable compression ratio with a
//! high performance. It has fixed memory usage, which contrary to other approachs, makes it less
//! memory hungry.
//!
//! Higher compression levels swap the single-slot table for hash chains ([`ChainTable`]),
//! trading speed for ratio. The output format is the same either way.

mod chain;
mod table;

pub use chain::{compress_chain, Candidate, ChainTable};
pub use table::{EncoderTable, U16Table, U32Table};

use std::mem;
use std::cmp;
use std::io::{self, Write, ErrorKind};
use byteorder::{NativeEndian, WriteBytesExt, LE};
use fehler::{throws};

use crate::window::MAX_DISTANCE;

type Error = std::io::Error;

pub(crate) const MINMATCH: usize = 4;
/// The last five bytes of a block are always literals.
pub(crate) const LAST_LITERALS: usize = 5;
/// The last match must start at least this many bytes before the end of the block.
pub(crate) const MF_LIMIT: usize = 12;

const SKIP_TRIGGER: usize = 6; // for each 64 steps, skip in bigger increments
const MAX_ACCELERATION: usize = 65537;

/// Highest meaningful compression level; anything above behaves like this.
pub const MAX_LEVEL: i32 = 12;
/// Lowest level that uses the hash-chain match finder.
pub const MIN_CHAIN_LEVEL: i32 = 3;
pub const DEFAULT_LEVEL: i32 = 0;

/// How hard the match finder works. Never affects the format of the output.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Single-slot hash table. Larger accelerations skip ahead faster over incompressible data.
    Fast { acceleration: usize },
    /// Hash chains, comparing up to `attempts` candidates per position.
    Chain { attempts: usize },
}

impl Strategy {
    /// Negative levels select faster modes, `0..=2` the default fast mode,
    /// and `3..=12` hash chains of increasing depth.
    pub fn from_level(level: i32) -> Self {
        if level < 0 {
            let acceleration = cmp::min(level.unsigned_abs() as usize, MAX_ACCELERATION);
            Strategy::Fast { acceleration }
        } else if level < MIN_CHAIN_LEVEL {
            Strategy::Fast { acceleration: 1 }
        } else {
            let level = cmp::min(level, MAX_LEVEL);
            Strategy::Chain { attempts: 1 << (level - 1) }
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::from_level(DEFAULT_LEVEL)
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct Duplicate {
    /// The number of bytes before our cursor, where the duplicate starts.
    pub offset: u16,

    /// The length beyond the four first bytes.
    ///
    /// Adding four to this number yields the actual length.
    pub extra_bytes: usize,
}

pub(crate) fn count_matching_bytes(a: &[u8], b: &[u8]) -> usize {
    const REGSIZE: usize = mem::size_of::<usize>();
    fn read_usize(b: &[u8]) -> usize { // sadly byteorder doesn't have this
        let mut buf = [0u8; REGSIZE];
        buf.copy_from_slice(&b[..REGSIZE]);
        usize::from_le_bytes(buf)
    }

    let mut matching_bytes = 0;
    // match in chunks of usize so we process a full register at a time instead of single bytes
    for (a, b) in a.chunks_exact(REGSIZE).zip(b.chunks_exact(REGSIZE)) {
        let xor = read_usize(a) ^ read_usize(b);
        if xor == 0 {
            matching_bytes += REGSIZE;
        } else {
            // read_usize is little endian on every platform
            matching_bytes += (xor.trailing_zeros() / 8/*bits per byte*/) as usize;
            return matching_bytes;
        }
    }

    // we only return here if we ran out of data (i.e. all full registers have matched)
    // but there may be a few more bytes to check!
    let trailing_matches = a.iter().zip(b).skip(matching_bytes).take_while(|&(a, b)| a == b).count();
    matching_bytes + trailing_matches
}

#[throws]
pub(crate) fn write_group<W: Write>(mut writer: &mut W, literal: &[u8], duplicate: Duplicate) {
    let literal_len = literal.len();

    let mut token = 0;
    write_lsic_head(&mut token, 4, literal_len);
    write_lsic_head(&mut token, 0, duplicate.extra_bytes);

    writer.write_u8(token)?;
    write_lsic_tail(&mut writer, literal_len)?;
    writer.write_all(literal)?;
    writer.write_u16::<LE>(duplicate.offset)?;
    write_lsic_tail(&mut writer, duplicate.extra_bytes)?;
}

/// The final sequence of every block: literals only, no match.
#[throws]
pub(crate) fn write_last_literals<W: Write>(mut writer: &mut W, literal: &[u8]) {
    let mut token = 0;
    write_lsic_head(&mut token, 4, literal.len());
    writer.write_u8(token)?;
    write_lsic_tail(&mut writer, literal.len())?;
    writer.write_all(literal)?;
}

fn write_lsic_head(token: &mut u8, shift: usize, value: usize) {
    let i = cmp::min(value, 0xF) as u8;
    *token |= i << shift;
}

#[throws]
fn write_lsic_tail<W: Write>(writer: &mut W, mut value: usize) {
    if value < 0xF {
        return;
    }

    value -= 0xF;

    while value >= 4 * 0xFF {
        writer.write_u32::<NativeEndian>(u32::MAX)?;
        value -= 4 * 0xFF;
    }
    while value >= 0xFF {
        writer.write_u8(0xFF)?;
        value -= 0xFF;
    }
    writer.write_u8(value as u8)?;
}

/// Compress `input[cursor..]` with the single-slot table, using `input[..cursor]` as history.
///
/// Positions in `table` are interpreted relative to the start of `input`.
#[throws]
pub fn compress_fast<W: Write, T: EncoderTable>(input: &[u8], cursor: usize, table: &mut T, acceleration: usize, mut writer: W) {
    assert!(input.len() <= T::payload_size_limit());

    let acceleration = cmp::max(acceleration, 1);
    let init_cursor = cursor;
    let mut cursor = cursor;
    loop {
        let literal_start = cursor;

        let mut step_counter = acceleration << SKIP_TRIGGER;
        let mut step = 1;
        // look for a duplicate
        let duplicate = loop {
            if input.len().saturating_sub(cursor) < MF_LIMIT {
                // end with a literal-only section
                write_last_literals(&mut writer, &input[literal_start..])?;
                return;
            }

            // due to the check above we know there's at least 12 bytes of space
            // we have to chop off the last five bytes though because these must be literals
            let current_batch = &input[cursor..(input.len() - LAST_LITERALS)];
            let candidate = table.replace(input, cursor);

            // for correctness, only comparing candidate to cursor is needed here;
            // skipping the very first byte keeps the output identical to the reference encoder
            if cursor != init_cursor
                && candidate < cursor
                && cursor - candidate <= MAX_DISTANCE { // must be an addressable offset
                // let's see how many matching bytes we have
                let candidate_batch = &input[candidate..];
                let matching_bytes = count_matching_bytes(current_batch, candidate_batch);

                if let Some(mut extra_bytes) = matching_bytes.checked_sub(MINMATCH) {
                    // if it wasn't, this was just a hash collision :(
                    let offset = (cursor - candidate) as u16;

                    // backtrack
                    let max_backtrack = cursor - literal_start;
                    let backtrack = input[..cursor].iter().rev().zip(input[..candidate].iter().rev()).take(max_backtrack).take_while(|&(a, b)| a == b).count();
                    // offset remains unchanged
                    extra_bytes += backtrack;
                    cursor += matching_bytes;

                    table.replace(input, cursor - 2);

                    break Duplicate { offset, extra_bytes };
                }
            }

            // no match, keep looping
            cursor += step;
            step = step_counter >> SKIP_TRIGGER;

            // the first byte of each iteration doesn't count
            if literal_start + 1 != cursor {
                step_counter += 1
            }
        };

        // cursor is now pointing past the match
        let literal_end = cursor - duplicate.extra_bytes - MINMATCH;
        write_group(&mut writer, &input[literal_start..literal_end], duplicate)?;
    }
}

enum Tables {
    Fast { table: Box<U32Table>, template: Box<U32Table>, acceleration: usize },
    Chain { table: Box<ChainTable>, attempts: usize },
}

/// Block compressor state that can be carried across the blocks of a stream.
///
/// Owns its match tables outright; nothing is shared between encoders.
pub struct BlockEncoder {
    strategy: Strategy,
    tables: Tables,
}

impl BlockEncoder {
    pub fn new(strategy: Strategy) -> Self {
        let tables = match strategy {
            Strategy::Fast { acceleration } => Tables::Fast {
                table: Box::new(U32Table::default()),
                template: Box::new(U32Table::default()),
                acceleration,
            },
            Strategy::Chain { attempts } => Tables::Chain {
                table: Box::new(ChainTable::default()),
                attempts,
            },
        };
        BlockEncoder { strategy, tables }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Index `prefix` (the initial history, e.g. a dictionary) and remember the
    /// resulting state so [`restore`](Self::restore) can return to it.
    pub fn prime(&mut self, prefix: &[u8]) {
        match &mut self.tables {
            Tables::Fast { table, template, .. } => {
                **table = U32Table::default();
                for offset in (0..prefix.len().saturating_sub(mem::size_of::<u64>() - 1)).step_by(3) {
                    table.replace(prefix, offset);
                }
                template.clone_from(table);
            }
            // chains index the history on every call anyway
            Tables::Chain { .. } => {}
        }
    }

    /// Go back to the state right after the last [`prime`](Self::prime).
    pub fn restore(&mut self) {
        if let Tables::Fast { table, template, .. } = &mut self.tables {
            table.clone_from(template);
        }
    }

    /// The input buffer dropped `amount` bytes at its front.
    pub fn slide(&mut self, amount: usize) {
        if let Tables::Fast { table, .. } = &mut self.tables {
            table.offset(amount);
        }
    }

    /// Compress `input[cursor..]`, allowing references into `input[..cursor]`.
    #[throws]
    pub fn compress<W: Write>(&mut self, input: &[u8], cursor: usize, writer: W) {
        match &mut self.tables {
            Tables::Fast { table, acceleration, .. } => compress_fast(input, cursor, &mut **table, *acceleration, writer)?,
            Tables::Chain { table, attempts } => compress_chain(input, cursor, table, *attempts, writer)?,
        }
    }
}

/// Compress all bytes of `input` into a raw block.
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(input.len());
    compress_into(input, &mut buf);
    buf
}

/// Compress all bytes of `input` into a raw block, appending to `output`.
pub fn compress_into(input: &[u8], output: &mut Vec<u8>) {
    // writing into a Vec cannot fail
    let result = if input.len() <= U16Table::payload_size_limit() {
        compress_fast(input, 0, &mut U16Table::default(), 1, &mut *output)
    } else {
        compress_fast(input, 0, &mut U32Table::default(), 1, &mut *output)
    };
    debug_assert!(result.is_ok());
}

/// Helper struct to allow more efficient code generation when using the Write trait on byte buffers.
///
/// The underlying problem is that the Write impl on [u8] (and everything similar, e.g. Cursor<[u8]>)
/// is specified to write as many bytes as possible before returning an error.
/// This is a problem because it forces e.g. a 32-bit write to compile to four 8-bit writes with a range
/// check every time, rather than a single 32-bit write with a range check.
///
/// This wrapper aims to resolve the problem by simply not writing anything in case we fail the bounds check,
/// as we throw away the entire buffer in that case anyway.
pub(crate) struct NoPartialWrites<'a>(pub &'a mut [u8]);
impl<'a> Write for NoPartialWrites<'a> {
    #[inline]
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.0.len() < data.len() {
            return Err(ErrorKind::WriteZero.into());
        }

        let amt = data.len();
        let (a, b) = mem::replace(&mut self.0, &mut []).split_at_mut(data.len());
        a.copy_from_slice(data);
        self.0 = b;
        Ok(amt)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
