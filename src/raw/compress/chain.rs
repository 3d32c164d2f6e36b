//! Hash-chain match finder for the higher compression levels.
//!
//! Where the fast table only remembers the newest position per hash, this keeps a
//! chain of every earlier position inside the window and walks it looking for the
//! longest match. The walk goes from nearest to farthest and only accepts strictly
//! longer matches, so among equally long candidates the smallest offset wins.

use std::io::Write;
use byteorder::{ByteOrder, LE};
use fehler::throws;

use super::{count_matching_bytes, write_group, write_last_literals, Duplicate, LAST_LITERALS, MF_LIMIT, MINMATCH};
use crate::window::MAX_DISTANCE;

type Error = std::io::Error;

const HASHLOG: usize = 15;
const HASH_SIZE: usize = 1 << HASHLOG;
const CHAIN_SIZE: usize = 1 << 16;
const CHAIN_MASK: usize = CHAIN_SIZE - 1;

fn hash4(input: &[u8]) -> usize {
    (LE::read_u32(input).wrapping_mul(2654435761) >> (32 - HASHLOG)) as usize
}

/// A match found by the chain walk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub offset: usize,
    pub len: usize,
}

pub struct ChainTable {
    /// newest position + 1 per hash, 0 if empty
    head: Vec<u32>,
    /// distance from a position to the previous one with the same hash, 0 ends the chain
    chain: Vec<u16>,
    next_to_update: usize,
}

impl Default for ChainTable {
    fn default() -> Self {
        ChainTable {
            head: vec![0; HASH_SIZE],
            chain: vec![0; CHAIN_SIZE],
            next_to_update: 0,
        }
    }
}

impl ChainTable {
    pub fn reset(&mut self) {
        for h in self.head.iter_mut() {
            *h = 0;
        }
        self.next_to_update = 0;
    }

    /// Index every position before `target`.
    fn insert_until(&mut self, input: &[u8], target: usize) {
        while self.next_to_update < target {
            let pos = self.next_to_update;
            let h = hash4(&input[pos..]);
            let previous = self.head[h] as usize;
            let delta = match previous.checked_sub(1) {
                Some(prev) if pos - prev <= MAX_DISTANCE => (pos - prev) as u16,
                _ => 0,
            };
            self.chain[pos & CHAIN_MASK] = delta;
            self.head[h] = (pos + 1) as u32;
            self.next_to_update += 1;
        }
    }

    /// Longest match for `input[cursor..]` that ends before `limit`.
    ///
    /// Positions before `cursor` are indexed on the way. At most `attempts` candidates are compared.
    pub fn find_longest(&mut self, input: &[u8], cursor: usize, limit: usize, attempts: usize) -> Option<Candidate> {
        self.insert_until(input, cursor);

        let current = &input[cursor..limit];
        let mut best: Option<Candidate> = None;
        let mut next = (self.head[hash4(&input[cursor..])] as usize).checked_sub(1);

        for _ in 0..attempts {
            let pos = match next {
                Some(pos) => pos,
                None => break,
            };
            let offset = cursor - pos;
            if offset > MAX_DISTANCE {
                break;
            }

            let len = count_matching_bytes(current, &input[pos..]);
            // stale or colliding entries simply fail the byte comparison
            if len >= MINMATCH && best.map_or(true, |b| len > b.len) {
                best = Some(Candidate { offset, len });
                if len == current.len() {
                    break;
                }
            }

            let delta = self.chain[pos & CHAIN_MASK] as usize;
            next = if delta == 0 { None } else { pos.checked_sub(delta) };
        }

        best
    }
}

/// Compress `input[cursor..]`, using `input[..cursor]` as history.
///
/// After every match found, the next position is tried as well and wins if it yields a
/// longer match (one step of lazy matching).
#[throws]
pub fn compress_chain<W: Write>(input: &[u8], cursor: usize, table: &mut ChainTable, attempts: usize, mut writer: W) {
    table.reset();

    let attempts = attempts.max(1);
    let limit = input.len().saturating_sub(LAST_LITERALS);
    let mut cursor = cursor;
    let mut literal_start = cursor;

    loop {
        if input.len().saturating_sub(cursor) < MF_LIMIT {
            write_last_literals(&mut writer, &input[literal_start..])?;
            return;
        }

        let mut found = match table.find_longest(input, cursor, limit, attempts) {
            Some(found) => found,
            None => {
                cursor += 1;
                continue;
            }
        };

        while input.len() - (cursor + 1) >= MF_LIMIT {
            match table.find_longest(input, cursor + 1, limit, attempts) {
                Some(next) if next.len > found.len => {
                    cursor += 1;
                    found = next;
                }
                _ => break,
            }
        }

        // backtrack
        let candidate = cursor - found.offset;
        let max_backtrack = cursor - literal_start;
        let backtrack = input[..cursor].iter().rev()
            .zip(input[..candidate].iter().rev())
            .take(max_backtrack)
            .take_while(|&(a, b)| a == b)
            .count();

        let match_start = cursor - backtrack;
        let match_len = found.len + backtrack;
        write_group(&mut writer, &input[literal_start..match_start], Duplicate {
            offset: found.offset as u16,
            extra_bytes: match_len - MINMATCH,
        })?;

        cursor = match_start + match_len;
        literal_start = cursor;
    }
}
