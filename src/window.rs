//! History management for linked blocks and dictionaries.
//!
//! LZ4 back-references reach at most 65535 bytes back, so neither side ever needs
//! to remember more than the trailing 64 KiB of what came before the current block.

/// The LZ4 raw format maintains a lookback window of exactly 64KiB.
pub const WINDOW_SIZE: usize = 64 * 1024;

/// Largest back-reference distance the block format can express.
pub const MAX_DISTANCE: usize = 0xFFFF;

/// The part of a dictionary that can actually be referenced.
///
/// Dictionaries may be any size but everything before the trailing 64 KiB is
/// unreachable and silently ignored.
pub fn dictionary_tail(dict: &[u8]) -> &[u8] {
    &dict[dict.len().saturating_sub(WINDOW_SIZE)..]
}

/// Decoder-side history: the last (at most) 64 KiB of output.
#[derive(Clone, Debug, Default)]
pub struct Window {
    buf: Vec<u8>,
}

impl Window {
    pub fn new() -> Self {
        Window { buf: Vec::with_capacity(WINDOW_SIZE) }
    }

    /// Forget everything and start over from `prefix` (usually a dictionary, or nothing).
    pub fn reset_to(&mut self, prefix: &[u8]) {
        self.buf.clear();
        self.buf.extend_from_slice(dictionary_tail(prefix));
    }

    /// Append freshly produced output, dropping whatever falls out of the window.
    pub fn push(&mut self, data: &[u8]) {
        if data.len() >= WINDOW_SIZE {
            self.buf.clear();
            self.buf.extend_from_slice(&data[data.len() - WINDOW_SIZE..]);
        } else {
            let available = self.buf.len() + data.len();
            if let Some(surplus) = available.checked_sub(WINDOW_SIZE) {
                // remove as many bytes from front as we are replacing
                self.buf.drain(..surplus);
            }
            self.buf.extend_from_slice(data);
        }
        debug_assert!(self.buf.len() <= WINDOW_SIZE);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

/// Encoder-side buffer: history followed by the input of the block being assembled.
///
/// Keeping both in one contiguous buffer lets the match finder address history and
/// new input with the same plain indices.
#[derive(Clone, Debug, Default)]
pub struct StreamWindow {
    buf: Vec<u8>,
    history: usize,
}

impl StreamWindow {
    pub fn with_capacity(block_size: usize) -> Self {
        StreamWindow { buf: Vec::with_capacity(WINDOW_SIZE + block_size), history: 0 }
    }

    /// Drop history and pending input, then use `prefix` as the new history.
    pub fn reset_to(&mut self, prefix: &[u8]) {
        self.buf.clear();
        self.buf.extend_from_slice(dictionary_tail(prefix));
        self.history = self.buf.len();
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes in front of the pending block.
    pub fn history_len(&self) -> usize {
        self.history
    }

    pub fn pending(&self) -> &[u8] {
        &self.buf[self.history..]
    }

    /// History plus pending input.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Turn the pending block into history and trim the front down to the window size.
    ///
    /// Returns how many bytes were dropped from the front so position-based tables
    /// can be shifted by the same amount.
    pub fn commit(&mut self) -> usize {
        let excess = self.buf.len().saturating_sub(WINDOW_SIZE);
        if excess > 0 {
            self.buf.drain(..excess);
        }
        self.history = self.buf.len();
        excess
    }
}
