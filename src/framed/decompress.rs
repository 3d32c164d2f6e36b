use byteorder::{ByteOrder, LE};
use std::io::{self, Read, BufRead, ErrorKind as IoErrorKind};
use std::cmp;
use thiserror::Error;
use fehler::{throw, throws};
use log::{debug, trace, warn};

use super::{MAGIC, INCOMPRESSIBLE, SKIPPABLE_MAGIC};
use super::header::{self, BlockDescriptor, Flags, FrameInfo};
use crate::ErrorKind;
use crate::checksum::{checksum, header_checksum, Checksum};
use crate::raw::decompress as raw;
use crate::window::{dictionary_tail, Window, WINDOW_SIZE};


/// Errors when decompressing an LZ4 frame.
#[derive(Error, Debug)]
pub enum DecompressionError {
    #[error("error reading from the input you gave me")]
    InputError(#[from] io::Error),
    #[error("the raw LZ4 decompression failed (data corruption?)")]
    CodecError(#[from] raw::DecodeError),
    #[error("invalid header")]
    HeaderParseError(#[from] header::ParseError),
    #[error("wrong magic number in file header: {0:08x}")]
    WrongMagic(u32),
    #[error("the header checksum was invalid")]
    HeaderChecksumFail,
    #[error("a block checksum was invalid")]
    BlockChecksumFail,
    #[error("the frame checksum was invalid")]
    FrameChecksumFail,
    #[error("a block claims to be {size} bytes long but the frame allows at most {max}")]
    BlockTooLarge { size: usize, max: usize },
    #[error("frame header declared {declared} bytes of content but the frame contained {actual}")]
    ContentSizeMismatch { declared: u64, actual: u64 },
    #[error("the input ended in the middle of a frame")]
    TruncatedFrame,
    #[error("the frame is already complete, reset the decoder to read another one")]
    Finished,
    #[error("an earlier call on this decoder failed, reset it first")]
    Failed,
}
type Error = DecompressionError; // do it this way for better docs

impl DecompressionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InputError(_) => ErrorKind::Io,
            Error::CodecError(e) => e.kind(),
            Error::HeaderParseError(_) | Error::WrongMagic(_) | Error::HeaderChecksumFail => ErrorKind::Format,
            Error::BlockTooLarge { .. } => ErrorKind::Capacity,
            Error::Finished | Error::Failed => ErrorKind::Sequence,
            Error::BlockChecksumFail
            | Error::FrameChecksumFail
            | Error::ContentSizeMismatch { .. }
            | Error::TruncatedFrame => ErrorKind::Corruption,
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        io::Error::new(IoErrorKind::Other, e)
    }
}

/// Parse a complete descriptor: FLG, BD, optional fields and the header checksum byte.
#[throws]
fn parse_descriptor(descriptor: &[u8]) -> FrameInfo {
    let (fields, checksum) = descriptor.split_at(descriptor.len() - 1);
    if header_checksum(fields) != checksum[0] {
        throw!(Error::HeaderChecksumFail);
    }
    FrameInfo::from_descriptor(fields)?
}

/// Read the header at the start of `input` without decompressing anything.
///
/// Returns the frame's parameters and the length of the header in bytes.
#[throws]
pub fn get_frame_info(input: &[u8]) -> (FrameInfo, usize) {
    if input.len() < 4 {
        throw!(Error::TruncatedFrame);
    }
    let magic = LE::read_u32(input);
    if magic != MAGIC {
        throw!(Error::WrongMagic(magic));
    }
    if input.len() < 6 {
        throw!(Error::TruncatedFrame);
    }
    let flags = Flags::parse(input[4])?;
    BlockDescriptor::parse(input[5])?.block_size()?;

    let end = 6 + flags.optional_fields_len() + 1;
    if input.len() < end {
        throw!(Error::TruncatedFrame);
    }
    (parse_descriptor(&input[4..end])?, end)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Magic,
    Descriptor,
    DescriptorExtra,
    DescriptorChecksum,
    BlockSize,
    BlockData { len: usize, compressed: bool },
    BlockChecksum { compressed: bool },
    ContentChecksum,
    SkippableSize,
    Skip(u64),
    Done,
    Failed,
}

/// Incremental frame decompressor.
///
/// Input can be split at any byte boundary; the decoder buffers partial fields internally and
/// picks up where it left off on the next call. Each complete block is appended to the
/// caller's output as soon as it has been verified, so memory use is bounded by the block size.
///
/// Any error puts the decoder into a failed state that rejects all further calls until [`reset`](Self::reset).
pub struct FrameDecoder<'a> {
    dictionary: &'a [u8],
    stage: Stage,
    /// bytes of the field currently being read
    stash: Vec<u8>,
    block: Vec<u8>,
    scratch: Vec<u8>,
    info: FrameInfo,
    header_done: bool,
    block_max: usize,
    window: Window,
    content_hasher: Checksum,
    produced: u64,
}

impl FrameDecoder<'static> {
    pub fn new() -> Self {
        FrameDecoder::with_dictionary(&[])
    }
}

impl Default for FrameDecoder<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> FrameDecoder<'a> {
    /// A decoder for frames compressed against `dict`.
    ///
    /// The dictionary must not change while the decoder is alive.
    pub fn with_dictionary(dict: &'a [u8]) -> Self {
        FrameDecoder {
            dictionary: dictionary_tail(dict),
            stage: Stage::Magic,
            stash: Vec::with_capacity(32),
            block: Vec::new(),
            scratch: Vec::new(),
            info: FrameInfo::default(),
            header_done: false,
            block_max: 0,
            window: Window::new(),
            content_hasher: Checksum::new(),
            produced: 0,
        }
    }

    /// Forget the current frame and get ready for a new one.
    pub fn reset(&mut self) {
        self.stage = Stage::Magic;
        self.stash.clear();
        self.block.clear();
        self.header_done = false;
        self.content_hasher = Checksum::new();
        self.produced = 0;
    }

    /// The parameters of the current frame, once its header has been read.
    pub fn frame_info(&self) -> Option<&FrameInfo> {
        if self.header_done { Some(&self.info) } else { None }
    }

    /// Whether the end of the frame (including its content checksum) has been reached.
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Whether the decoder sits right before a magic number with nothing buffered,
    /// i.e. in between frames.
    pub fn is_at_frame_boundary(&self) -> bool {
        self.stage == Stage::Magic && self.stash.is_empty()
    }

    /// Number of input bytes that complete the field the decoder is currently waiting for.
    ///
    /// Feeding at most this many bytes guarantees the decoder never receives data past the end
    /// of the frame. Zero once the frame is finished.
    pub fn bytes_needed(&self) -> usize {
        match self.stage {
            Stage::Done | Stage::Failed => 0,
            Stage::Skip(remaining) => cmp::min(remaining, usize::MAX as u64) as usize,
            Stage::BlockData { len, .. } => len - self.block.len(),
            _ => self.field_len() - self.stash.len(),
        }
    }

    /// Total size of the field in `stash` the current stage waits for.
    fn field_len(&self) -> usize {
        match self.stage {
            Stage::Magic | Stage::BlockSize | Stage::SkippableSize => 4,
            Stage::BlockChecksum { .. } | Stage::ContentChecksum => 4,
            Stage::Descriptor => 2,
            // the descriptor stages keep accumulating so the checksum covers all of it
            Stage::DescriptorExtra => 2 + Flags::from_bits_truncate(self.stash[0]).optional_fields_len(),
            Stage::DescriptorChecksum => 2 + Flags::from_bits_truncate(self.stash[0]).optional_fields_len() + 1,
            Stage::BlockData { .. } | Stage::Skip(_) | Stage::Done | Stage::Failed => 0,
        }
    }

    /// Feed more input, appending decompressed data to `output`.
    ///
    /// Returns how many bytes of `input` were consumed. This is all of them, unless the frame
    /// ends inside `input`: the decoder then stops right after the frame and
    /// [`is_finished`](Self::is_finished) turns true.
    #[throws]
    pub fn update_into(&mut self, input: &[u8], output: &mut Vec<u8>) -> usize {
        match self.stage {
            Stage::Failed => throw!(Error::Failed),
            Stage::Done if input.is_empty() => return 0,
            Stage::Done => throw!(Error::Finished),
            _ => {}
        }

        match self.advance(input, output) {
            Ok(consumed) => consumed,
            Err(e) => {
                warn!("frame decoder failed: {}", e);
                self.stage = Stage::Failed;
                throw!(e);
            }
        }
    }

    /// Like [`update_into`](Self::update_into), returning the output in a new vector.
    #[throws]
    pub fn update(&mut self, input: &[u8]) -> (Vec<u8>, usize) {
        let mut output = Vec::new();
        let consumed = self.update_into(input, &mut output)?;
        (output, consumed)
    }

    #[throws]
    fn advance(&mut self, mut input: &[u8], output: &mut Vec<u8>) -> usize {
        let total = input.len();
        loop {
            match self.stage {
                Stage::Done | Stage::Failed => break,
                Stage::Skip(remaining) => {
                    if input.is_empty() {
                        break;
                    }
                    let n = cmp::min(remaining, input.len() as u64);
                    input = &input[n as usize..];
                    self.stage = if n == remaining { Stage::Magic } else { Stage::Skip(remaining - n) };
                }
                Stage::BlockData { len, compressed } => {
                    let n = cmp::min(len - self.block.len(), input.len());
                    self.block.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    if self.block.len() < len {
                        break;
                    }
                    if self.info.block_checksums {
                        self.stage = Stage::BlockChecksum { compressed };
                    } else {
                        self.decode_block(compressed, output)?;
                        self.stage = Stage::BlockSize;
                    }
                }
                _ => {
                    let wanted = self.field_len();
                    let n = cmp::min(wanted - self.stash.len(), input.len());
                    self.stash.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    if self.stash.len() < wanted {
                        break;
                    }
                    self.field_complete(output)?;
                }
            }
        }
        total - input.len()
    }

    /// The stash holds a complete field for the current stage.
    #[throws]
    fn field_complete(&mut self, output: &mut Vec<u8>) {
        match self.stage {
            Stage::Magic => {
                let magic = LE::read_u32(&self.stash);
                self.stash.clear();
                self.stage = if magic == MAGIC {
                    Stage::Descriptor
                } else if SKIPPABLE_MAGIC.contains(&magic) {
                    Stage::SkippableSize
                } else {
                    throw!(Error::WrongMagic(magic));
                };
            }
            Stage::Descriptor => {
                // reject garbage before waiting for optional fields
                Flags::parse(self.stash[0])?;
                BlockDescriptor::parse(self.stash[1])?.block_size()?;
                self.stage = Stage::DescriptorExtra;
            }
            Stage::DescriptorExtra => self.stage = Stage::DescriptorChecksum,
            Stage::DescriptorChecksum => {
                let info = parse_descriptor(&self.stash)?;
                self.stash.clear();
                self.start_frame(info);
                self.stage = Stage::BlockSize;
            }
            Stage::BlockSize => {
                let size = LE::read_u32(&self.stash);
                self.stash.clear();
                if size == 0 {
                    self.end_of_blocks()?;
                } else {
                    let compressed = size & INCOMPRESSIBLE == 0;
                    let len = (size & !INCOMPRESSIBLE) as usize;
                    if len > self.block_max {
                        throw!(Error::BlockTooLarge { size: len, max: self.block_max });
                    }
                    self.block.clear();
                    self.stage = Stage::BlockData { len, compressed };
                }
            }
            Stage::BlockChecksum { compressed } => {
                let expected = LE::read_u32(&self.stash);
                self.stash.clear();
                if checksum(&self.block) != expected {
                    throw!(Error::BlockChecksumFail);
                }
                self.decode_block(compressed, output)?;
                self.stage = Stage::BlockSize;
            }
            Stage::ContentChecksum => {
                let expected = LE::read_u32(&self.stash);
                self.stash.clear();
                if self.content_hasher.finish() != expected {
                    throw!(Error::FrameChecksumFail);
                }
                self.frame_done();
            }
            Stage::SkippableSize => {
                let len = LE::read_u32(&self.stash);
                self.stash.clear();
                debug!("skipping {} bytes of skippable frame", len);
                self.stage = if len == 0 { Stage::Magic } else { Stage::Skip(len.into()) };
            }
            Stage::BlockData { .. } | Stage::Skip(_) | Stage::Done | Stage::Failed => {
                unreachable!("stage {:?} does not use the stash", self.stage)
            }
        }
    }

    fn start_frame(&mut self, info: FrameInfo) {
        debug!(
            "frame header parsed: block size {:?}, flags {:?}, content size {:?}, dictionary id {:?}",
            info.block_size, info.flags(), info.content_size, info.dictionary_id
        );
        self.info = info;
        self.header_done = true;
        self.block_max = info.block_size.bytes();
        self.window.reset_to(self.dictionary);
        self.content_hasher = Checksum::new();
        self.produced = 0;
    }

    /// Decode the block in `self.block` and append it to `output`.
    ///
    /// Nothing is appended if decoding fails.
    #[throws]
    fn decode_block(&mut self, compressed: bool, output: &mut Vec<u8>) {
        self.scratch.clear();
        if compressed {
            let prefix = if self.info.independent_blocks { self.dictionary } else { self.window.as_slice() };
            raw::decompress_raw(&self.block, prefix, &mut self.scratch, self.block_max)?;
        } else {
            self.scratch.extend_from_slice(&self.block);
        }
        trace!(
            "{} block of {} bytes decoded into {} bytes",
            if compressed { "compressed" } else { "stored" },
            self.block.len(),
            self.scratch.len()
        );

        if !self.info.independent_blocks {
            self.window.push(&self.scratch);
        }
        if self.info.content_checksum {
            self.content_hasher.update(&self.scratch);
        }
        self.produced += self.scratch.len() as u64;
        output.extend_from_slice(&self.scratch);
    }

    #[throws]
    fn end_of_blocks(&mut self) {
        if let Some(declared) = self.info.content_size {
            if declared != self.produced {
                throw!(Error::ContentSizeMismatch { declared, actual: self.produced });
            }
        }
        if self.info.content_checksum {
            self.stage = Stage::ContentChecksum;
        } else {
            self.frame_done();
        }
    }

    fn frame_done(&mut self) {
        debug!("frame finished after {} bytes of output", self.produced);
        self.stage = Stage::Done;
    }
}

/// Wrapper around `LZ4FrameReader` that implements `Read` and `BufRead`.
pub struct LZ4FrameIoReader<R: Read> {
    frame_reader: LZ4FrameReader<R>,
    bytes_taken: usize,
    buffer: Vec<u8>,
}
impl<R: Read> Read for LZ4FrameIoReader<R> {
    #[throws(io::Error)]
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mybuf = self.fill_buf()?;
        let bytes_to_take = cmp::min(mybuf.len(), buf.len());
        buf[..bytes_to_take].copy_from_slice(&mybuf[..bytes_to_take]);
        self.consume(bytes_to_take);
        bytes_to_take
    }
}
impl<R: Read> BufRead for LZ4FrameIoReader<R> {
    #[throws(io::Error)]
    fn fill_buf(&mut self) -> &[u8] {
        if self.bytes_taken == self.buffer.len() {
            self.buffer.clear();
            self.frame_reader.decode_block(&mut self.buffer)?;
            self.bytes_taken = 0;
        }
        &self.buffer[self.bytes_taken..]
    }

    fn consume(&mut self, amt: usize) {
        self.bytes_taken += amt;
        assert!(self.bytes_taken <= self.buffer.len(), "You consumed more bytes than I even gave you!");
    }
}

/// Read an LZ4-compressed frame.
///
/// This reader reads the blocks inside a frame one by one. It never reads past the end
/// of the frame, so whatever follows stays in the underlying reader.
pub struct LZ4FrameReader<R: Read> {
    reader: R,
    decoder: FrameDecoder<'static>,
    info: FrameInfo,
    read_buf: Vec<u8>,
}

impl<R: Read> LZ4FrameReader<R> {
    /// Read the frame header (skipping any skippable frames in front of it).
    #[throws]
    pub fn new(reader: R) -> Self {
        let mut frame_reader = LZ4FrameReader {
            reader,
            decoder: FrameDecoder::new(),
            info: FrameInfo::default(),
            read_buf: Vec::new(),
        };

        let mut sink = Vec::new();
        while frame_reader.decoder.frame_info().is_none() {
            frame_reader.pump(&mut sink)?;
        }
        frame_reader.info = *frame_reader.decoder.frame_info().ok_or(Error::TruncatedFrame)?;
        frame_reader
    }

    pub fn block_size(&self) -> usize { self.info.block_size.bytes() }
    pub fn frame_size(&self) -> Option<u64> { self.info.content_size }
    pub fn dictionary_id(&self) -> Option<u32> { self.info.dictionary_id }
    pub fn frame_info(&self) -> &FrameInfo { &self.info }

    pub fn into_read(self) -> LZ4FrameIoReader<R> {
        LZ4FrameIoReader {
            buffer: Vec::with_capacity(self.block_size()),
            bytes_taken: 0,
            frame_reader: self,
        }
    }

    /// Read exactly as many bytes as the decoder needs next (bounded) and feed them to it.
    #[throws]
    fn pump(&mut self, output: &mut Vec<u8>) {
        let wanted = cmp::min(self.decoder.bytes_needed(), WINDOW_SIZE);
        if wanted == 0 {
            // finished or failed: let the decoder accept or reject the call
            self.decoder.update_into(&[], output)?;
            return;
        }
        self.read_buf.resize(wanted, 0);
        self.reader.read_exact(&mut self.read_buf).map_err(|e| match e.kind() {
            IoErrorKind::UnexpectedEof => Error::TruncatedFrame,
            _ => Error::InputError(e),
        })?;
        self.decoder.update_into(&self.read_buf, output)?;
    }

    /// Decode the next block into `output`, which must be empty.
    /// Leaves `output` empty once the end of the frame has been reached.
    #[throws]
    pub fn decode_block(&mut self, output: &mut Vec<u8>) {
        assert!(output.is_empty(), "You must pass an empty buffer to this interface.");

        while output.is_empty() && !self.decoder.is_finished() {
            self.pump(output)?;
        }
    }
}

/// Decompress a complete input, which may contain several concatenated frames
/// (skippable frames are skipped). Returns the concatenated content of all frames.
#[throws]
pub fn decompress_frame<R: Read>(reader: R) -> Vec<u8> {
    decompress_frame_with_dictionary(reader, &[])?
}

/// Like [`decompress_frame`], for frames compressed against `dict`.
#[throws]
pub fn decompress_frame_with_dictionary<R: Read>(mut reader: R, dict: &[u8]) -> Vec<u8> {
    let mut decoder = FrameDecoder::with_dictionary(dict);
    let mut plaintext = Vec::new();
    let mut buf = vec![0u8; WINDOW_SIZE];
    let mut seen_any = false;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
            Err(e) => throw!(Error::InputError(e)),
        };
        seen_any = true;

        let mut chunk = &buf[..n];
        while !chunk.is_empty() {
            if decoder.is_finished() {
                decoder.reset();
            }
            let consumed = decoder.update_into(chunk, &mut plaintext)?;
            chunk = &chunk[consumed..];
        }
    }

    if !(decoder.is_finished() || (seen_any && decoder.is_at_frame_boundary())) {
        throw!(Error::TruncatedFrame);
    }
    plaintext
}
