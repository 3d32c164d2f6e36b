use byteorder::{LE, WriteBytesExt};
use std::io::{self, Read, Write, Seek, SeekFrom, ErrorKind as IoErrorKind};
use thiserror::Error;
use fehler::{throw, throws};
use log::{debug, trace, warn};

use super::INCOMPRESSIBLE;
use super::header::{BlockSize, FrameInfo};
use crate::ErrorKind;
use crate::checksum::{checksum, Checksum};
use crate::raw::{BlockEncoder, Strategy};
use crate::raw::compress::{NoPartialWrites, DEFAULT_LEVEL};
use crate::window::{dictionary_tail, StreamWindow};


/// Errors when compressing an LZ4 frame.
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("error reading from the input you gave me")]
    ReadError(io::Error),
    #[error("error writing to the output you gave me")]
    WriteError(#[from] io::Error),
    #[error("the frame header was already written")]
    AlreadyStarted,
    #[error("the frame was already finished")]
    AlreadyFinished,
    #[error("an earlier call on this encoder failed, reset it first")]
    Failed,
    #[error("content size requested but not known, use compress_with_size or encoder_with_size")]
    MissingContentSize,
    #[error("frame header declared {declared} bytes of content but {actual} were supplied")]
    ContentSizeMismatch { declared: u64, actual: u64 },
    #[error("skippable frame payload of {0} bytes does not fit its 32-bit length field")]
    PayloadTooLarge(usize),
}
type Error = CompressionError; // do it this way for better docs

impl CompressionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ReadError(_) | Error::WriteError(_) => ErrorKind::Io,
            Error::PayloadTooLarge(_) => ErrorKind::Capacity,
            _ => ErrorKind::Sequence,
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        io::Error::new(IoErrorKind::Other, e)
    }
}

/// A builder-style struct that configures compression settings.
/// This is how you compress LZ4 frames.
/// (An LZ4 file usually consists of a single frame.)
///
/// Create it using `Default::default()`.
#[derive(Clone, Debug)]
pub struct CompressionSettings<'a> {
    independent_blocks: bool,
    block_checksums: bool,
    content_checksum: bool,
    content_size: bool,
    block_size: BlockSize,
    compression_level: i32,
    auto_flush: bool,
    dictionary: Option<&'a [u8]>,
    dictionary_id: Option<u32>,
}
impl<'a> Default for CompressionSettings<'a> {
    fn default() -> Self {
        Self {
            independent_blocks: true,
            block_checksums: false,
            content_checksum: true,
            content_size: false,
            block_size: BlockSize::Max4MB,
            compression_level: DEFAULT_LEVEL,
            auto_flush: false,
            dictionary: None,
            dictionary_id: None,
        }
    }
}
impl<'a> CompressionSettings<'a> {
    /// In independent mode, blocks are not allowed to reference data from previous blocks.
    /// Hence, using dependent blocks yields slightly better compression.
    /// The downside of dependent blocks is that seeking becomes impossible - the entire frame always has
    /// to be decompressed from the beginning.
    ///
    /// Blocks are independent by default.
    pub fn independent_blocks(&mut self, v: bool) -> &mut Self {
        self.independent_blocks = v;
        self
    }

    /// Block checksums can help detect data corruption in storage and transit.
    /// They do not offer error correction though.
    ///
    /// In most cases, block checksums are not very helpful because you generally want a lower
    /// layer to deal with data corruption more comprehensively.
    ///
    /// Block checksums are disabled by default.
    pub fn block_checksums(&mut self, v: bool) -> &mut Self {
        self.block_checksums = v;
        self
    }

    /// The content checksum (also called frame checksum) is calculated over the contents of the entire frame.
    /// This makes them cheaper than block checksums as their size overhead is constant
    /// as well as marginally more useful, because they can help protect against incorrect decompression.
    ///
    /// Note that the content checksum can only be verified *after* the entire frame has been read
    /// (and returned!), which is the downside of content checksums.
    ///
    /// Frame checksums are enabled by default.
    pub fn content_checksum(&mut self, v: bool) -> &mut Self {
        self.content_checksum = v;
        self
    }

    /// Store the uncompressed size in the frame header.
    ///
    /// The size has to be known up front, so with this enabled only [`compress_with_size`](Self::compress_with_size)
    /// and [`encoder_with_size`](Self::encoder_with_size) work. The encoder checks that exactly
    /// that many bytes were supplied when the frame is finished.
    ///
    /// Disabled by default.
    pub fn content_size(&mut self, v: bool) -> &mut Self {
        self.content_size = v;
        self
    }

    /// The default block size is 4 MiB.
    pub fn block_size(&mut self, v: BlockSize) -> &mut Self {
        self.block_size = v;
        self
    }

    /// Trade speed for compression ratio. Negative levels are faster, `3` and above search harder.
    /// This never changes the format, any decoder can read the result.
    ///
    /// The default level is 0.
    pub fn compression_level(&mut self, level: i32) -> &mut Self {
        self.compression_level = level;
        self
    }

    /// With auto flush, every update emits a block for whatever input it was given instead of
    /// buffering up to a full block. Lower latency, worse ratio.
    ///
    /// Disabled by default.
    pub fn auto_flush(&mut self, v: bool) -> &mut Self {
        self.auto_flush = v;
        self
    }

    /// A dictionary is essentially a constant slice of bytes shared by the compressing and decompressing party.
    /// Using a dictionary can improve compression ratios, because the compressor can reference data from the dictionary.
    ///
    /// The dictionary id is an application-specific identifier which can be used during decompression to determine
    /// which dictionary to use.
    ///
    /// Note that while the size of a dictionary can be arbitrary, dictionaries larger than 64 KiB are not useful as
    /// the LZ4 algorithm does not support backreferences by more than 64 KiB, i.e. any dictionary content before
    /// the trailing 64 KiB is silently ignored.
    ///
    /// The dictionary must not change while an encoder using it is alive.
    ///
    /// By default, no dictionary is used and no id is specified.
    pub fn dictionary(&mut self, id: u32, dict: &'a [u8]) -> &mut Self {
        self.dictionary_id = Some(id);
        self.dictionary = Some(dict);
        self
    }

    /// The dictionary id header field is intended to tell anyone trying to decompress your frame which dictionary to use.
    /// The LZ4 CLI never writes one, though, so frames compressed with a dictionary may well lack the id.
    ///
    /// This overrides the id written to the header (or removes it with `None`)
    /// without changing the dictionary that is actually used.
    pub fn dictionary_id(&mut self, id: Option<u32>) -> &mut Self {
        self.dictionary_id = id;
        self
    }

    fn frame_info(&self, content_size: Option<u64>) -> FrameInfo {
        FrameInfo {
            block_size: self.block_size,
            independent_blocks: self.independent_blocks,
            block_checksums: self.block_checksums,
            content_checksum: self.content_checksum,
            content_size,
            dictionary_id: self.dictionary_id,
        }
    }

    /// Create a streaming encoder with these settings.
    #[throws]
    pub fn encoder(&self) -> FrameEncoder<'a> {
        if self.content_size {
            throw!(Error::MissingContentSize);
        }
        FrameEncoder::new(self, None)
    }

    /// Create a streaming encoder that declares `content_size` bytes of input in the header.
    pub fn encoder_with_size(&self, content_size: u64) -> FrameEncoder<'a> {
        FrameEncoder::new(self, Some(content_size))
    }

    #[throws]
    pub fn compress<R: Read, W: Write>(&self, reader: R, writer: W) {
        self.compress_internal(reader, writer, self.encoder()?)?;
    }

    /// Like [`compress`](Self::compress), but declares `content_size` in the header.
    ///
    /// Fails with [`CompressionError::ContentSizeMismatch`] if the reader yields a different amount of data.
    #[throws]
    pub fn compress_with_size_unchecked<R: Read, W: Write>(&self, reader: R, writer: W, content_size: u64) {
        self.compress_internal(reader, writer, self.encoder_with_size(content_size))?;
    }

    #[throws]
    pub fn compress_with_size<R: Read + Seek, W: Write>(&self, mut reader: R, writer: W) {
        // we ignore all bytes before the cursor, which stream_len() would not
        let start = reader.seek(SeekFrom::Current(0)).map_err(Error::ReadError)?;
        let end = reader.seek(SeekFrom::End(0)).map_err(Error::ReadError)?;
        reader.seek(SeekFrom::Start(start)).map_err(Error::ReadError)?;

        let length = end - start;
        self.compress_internal(reader, writer, self.encoder_with_size(length))?;
    }

    #[throws]
    fn compress_internal<R: Read, W: Write>(&self, mut reader: R, mut writer: W, mut encoder: FrameEncoder<'a>) {
        let block_size = self.block_size.bytes();
        let mut in_buffer = Vec::with_capacity(block_size);
        let mut out_buffer = Vec::with_capacity(block_size);

        encoder.begin_into(&mut out_buffer)?;
        loop {
            // We basically want read_exact semantics, except at the end.
            // Sadly read_exact specifies the buffer contents to be undefined
            // on error, so we have to use this construction instead.
            in_buffer.clear();
            reader.by_ref().take(block_size as u64).read_to_end(&mut in_buffer).map_err(Error::ReadError)?;
            if in_buffer.is_empty() {
                break;
            }

            encoder.update_into(&in_buffer, &mut out_buffer)?;
            writer.write_all(&out_buffer)?;
            out_buffer.clear();
        }

        encoder.finish_into(&mut out_buffer)?;
        writer.write_all(&out_buffer)?;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Uninitialized,
    HeaderWritten,
    Streaming,
    Finalized,
    Failed,
}

/// Incremental frame compressor.
///
/// Input is buffered until a full block is available (or until [`flush_into`](Self::flush_into)),
/// so arbitrary chunking of the input produces the same frame.
///
/// Every method appends its output to a caller-supplied buffer. Any error puts the encoder
/// into a failed state that rejects all further calls until [`reset`](Self::reset).
pub struct FrameEncoder<'a> {
    info: FrameInfo,
    dictionary: &'a [u8],
    auto_flush: bool,
    state: State,
    window: StreamWindow,
    encoder: BlockEncoder,
    scratch: Vec<u8>,
    content_hasher: Option<Checksum>,
    consumed: u64,
}

impl<'a> FrameEncoder<'a> {
    fn new(settings: &CompressionSettings<'a>, content_size: Option<u64>) -> Self {
        let info = settings.frame_info(content_size);
        let dictionary = settings.dictionary.map(dictionary_tail).unwrap_or(&[]);
        let block_size = info.block_size.bytes();

        let mut window = StreamWindow::with_capacity(block_size);
        window.reset_to(dictionary);
        let mut encoder = BlockEncoder::new(Strategy::from_level(settings.compression_level));
        encoder.prime(dictionary);

        FrameEncoder {
            info,
            dictionary,
            auto_flush: settings.auto_flush,
            state: State::Uninitialized,
            window,
            encoder,
            scratch: Vec::with_capacity(block_size),
            content_hasher: if info.content_checksum { Some(Checksum::new()) } else { None },
            consumed: 0,
        }
    }

    /// The header this encoder writes.
    pub fn frame_info(&self) -> &FrameInfo {
        &self.info
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Finalized
    }

    /// Forget the current frame and start a new one with the same settings.
    pub fn reset(&mut self) {
        self.state = State::Uninitialized;
        self.window.reset_to(self.dictionary);
        self.encoder.restore();
        self.scratch.clear();
        if self.info.content_checksum {
            self.content_hasher = Some(Checksum::new());
        }
        self.consumed = 0;
    }

    /// Run `f` unless the encoder is finished or failed; mark it failed if `f` fails.
    #[throws]
    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, Error>) -> T {
        match self.state {
            State::Finalized => throw!(Error::AlreadyFinished),
            State::Failed => throw!(Error::Failed),
            _ => {}
        }
        match f(self) {
            Ok(v) => v,
            Err(e) => {
                warn!("frame encoder failed: {}", e);
                self.state = State::Failed;
                throw!(e);
            }
        }
    }

    fn ensure_header(&mut self, out: &mut Vec<u8>) {
        if self.state == State::Uninitialized {
            self.info.write(out);
            debug!(
                "frame header written: block size {:?}, flags {:?}, content size {:?}",
                self.info.block_size, self.info.flags(), self.info.content_size
            );
            self.state = State::HeaderWritten;
        }
    }

    /// Write the frame header. Calling this is optional, the first update does it implicitly.
    #[throws]
    pub fn begin_into(&mut self, out: &mut Vec<u8>) {
        self.guarded(|this| {
            if this.state != State::Uninitialized {
                return Err(Error::AlreadyStarted);
            }
            this.ensure_header(out);
            Ok(())
        })?;
    }

    /// Feed more input. Complete blocks are compressed and appended to `out`.
    #[throws]
    pub fn update_into(&mut self, mut input: &[u8], out: &mut Vec<u8>) {
        self.guarded(|this| {
            this.ensure_header(out);
            this.state = State::Streaming;

            if let Some(hasher) = this.content_hasher.as_mut() {
                hasher.update(input);
            }
            this.consumed += input.len() as u64;

            let block_size = this.info.block_size.bytes();
            while !input.is_empty() {
                let room = block_size - this.window.pending().len();
                let (now, later) = input.split_at(room.min(input.len()));
                this.window.push(now);
                input = later;
                if this.window.pending().len() == block_size {
                    this.emit_block(out);
                }
            }
            if this.auto_flush {
                this.emit_block(out);
            }
            Ok(())
        })?;
    }

    /// Compress whatever input is buffered into a (possibly short) block.
    #[throws]
    pub fn flush_into(&mut self, out: &mut Vec<u8>) {
        self.guarded(|this| {
            this.ensure_header(out);
            this.emit_block(out);
            Ok(())
        })?;
    }

    /// Flush, then write the end mark and the content checksum.
    /// The encoder rejects further input afterwards.
    #[throws]
    pub fn finish_into(&mut self, out: &mut Vec<u8>) {
        self.guarded(|this| {
            if let Some(declared) = this.info.content_size {
                if declared != this.consumed {
                    return Err(Error::ContentSizeMismatch { declared, actual: this.consumed });
                }
            }

            this.ensure_header(out);
            this.emit_block(out);
            out.write_u32::<LE>(0)?;
            if let Some(hasher) = this.content_hasher.as_ref() {
                out.write_u32::<LE>(hasher.finish())?;
            }
            debug!("frame finished after {} bytes of input", this.consumed);
            this.state = State::Finalized;
            Ok(())
        })?;
    }

    #[throws]
    pub fn begin(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        self.begin_into(&mut out)?;
        out
    }

    #[throws]
    pub fn update(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        self.update_into(input, &mut out)?;
        out
    }

    #[throws]
    pub fn flush(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        self.flush_into(&mut out)?;
        out
    }

    #[throws]
    pub fn finish(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        self.finish_into(&mut out)?;
        out
    }

    /// Compress the pending input into one block and append it to `out`.
    fn emit_block(&mut self, out: &mut Vec<u8>) {
        let pending_len = self.window.pending().len();
        if pending_len == 0 {
            return;
        }

        // 1. limit output by input size so we never have negative compression ratio
        // 2. use a wrapper that forbids partial writes, so don't write 32-bit integers
        //    as four individual bytes with four individual range checks
        self.scratch.resize(pending_len, 0);
        let compressed_len = {
            let mut cursor = NoPartialWrites(&mut self.scratch[..]);
            match self.encoder.compress(self.window.as_slice(), self.window.history_len(), &mut cursor) {
                Ok(()) => Some(pending_len - cursor.0.len()),
                // does not fit, so it's incompressible
                Err(_) => None,
            }
        };

        let block = match compressed_len {
            Some(len) => {
                out.extend_from_slice(&(len as u32).to_le_bytes());
                &self.scratch[..len]
            }
            None => {
                out.extend_from_slice(&(pending_len as u32 | INCOMPRESSIBLE).to_le_bytes());
                self.window.pending()
            }
        };
        out.extend_from_slice(block);
        if self.info.block_checksums {
            out.extend_from_slice(&checksum(block).to_le_bytes());
        }
        trace!(
            "block of {} bytes written as {} bytes ({})",
            pending_len,
            block.len(),
            if compressed_len.is_some() { "compressed" } else { "stored" }
        );

        if self.info.independent_blocks {
            self.window.reset_to(self.dictionary);
            self.encoder.restore();
        } else {
            let forgotten = self.window.commit();
            self.encoder.slide(forgotten);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use crate::framed::decompress_frame;

    fn sample() -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..20_000u32 {
            data.extend_from_slice(format!("line {} of some moderately repetitive text\n", i % 977).as_bytes());
        }
        data
    }

    #[test]
    fn empty_frame() {
        let mut encoder = CompressionSettings::default().block_size(BlockSize::Max64KB).encoder().unwrap();
        let frame = encoder.finish().unwrap();
        assert_eq!(frame, [0x04, 0x22, 0x4D, 0x18, 0x64, 0x40, 0xA7, 0, 0, 0, 0, 0x05, 0x5D, 0xCC, 0x02]);
        assert!(encoder.is_finished());
    }

    #[test]
    fn sequence_errors() {
        let mut encoder = CompressionSettings::default().encoder().unwrap();
        encoder.begin().unwrap();
        assert!(matches!(encoder.begin(), Err(CompressionError::AlreadyStarted)));
        // the failed begin poisoned the encoder
        assert!(matches!(encoder.update(b"x"), Err(CompressionError::Failed)));

        encoder.reset();
        encoder.update(b"abc").unwrap();
        encoder.finish().unwrap();
        let err = encoder.finish().unwrap_err();
        assert!(matches!(err, CompressionError::AlreadyFinished));
        assert_eq!(err.kind(), ErrorKind::Sequence);
        assert!(matches!(encoder.update(b"abc"), Err(CompressionError::AlreadyFinished)));
    }

    #[test]
    fn buffers_until_block_is_full() {
        let mut encoder = CompressionSettings::default().block_size(BlockSize::Max64KB).encoder().unwrap();
        let header = encoder.update(&[1u8; 1000]).unwrap();
        // header only, the block is still pending
        assert_eq!(header.len(), 7);
        assert!(encoder.update(&[1u8; 1000]).unwrap().is_empty());
        assert!(!encoder.flush().unwrap().is_empty());
        assert!(encoder.flush().unwrap().is_empty());
    }

    #[test]
    fn auto_flush_emits_every_update() {
        let mut settings = CompressionSettings::default();
        settings.auto_flush(true);
        let mut encoder = settings.encoder().unwrap();
        let mut frame = encoder.update(b"first chunk, ").unwrap();
        let second = encoder.update(b"second chunk").unwrap();
        assert!(second.len() > 4);
        frame.extend(second);
        frame.extend(encoder.finish().unwrap());
        assert_eq!(decompress_frame(&frame[..]).unwrap(), b"first chunk, second chunk");
    }

    #[test]
    fn stored_blocks_for_incompressible_data() {
        let mut data = vec![0u8; 100_000];
        StdRng::seed_from_u64(7).fill(&mut data[..]);
        let mut frame = Vec::new();
        CompressionSettings::default()
            .block_size(BlockSize::Max64KB)
            .compress(&data[..], &mut frame)
            .unwrap();
        // header + two stored blocks with their size fields + end mark + checksum
        assert_eq!(frame.len(), 7 + 4 + 65536 + 4 + (100_000 - 65536) + 4 + 4);
        assert_eq!(frame[7 + 3] & 0x80, 0x80);
        assert_eq!(decompress_frame(&frame[..]).unwrap(), data);
    }

    #[test]
    fn content_size_is_verified() {
        let mut settings = CompressionSettings::default();
        settings.content_size(true);
        assert!(matches!(settings.encoder(), Err(CompressionError::MissingContentSize)));

        let mut encoder = settings.encoder_with_size(5);
        encoder.update(b"four").unwrap();
        match encoder.finish() {
            Err(CompressionError::ContentSizeMismatch { declared: 5, actual: 4 }) => {}
            other => panic!("unexpected {:?}", other),
        }

        let mut frame = Vec::new();
        settings.compress_with_size(io::Cursor::new(sample()), &mut frame).unwrap();
        assert_eq!(decompress_frame(&frame[..]).unwrap(), sample());

        let mut frame = Vec::new();
        let err = settings.compress_with_size_unchecked(&b"abc"[..], &mut frame, 4).unwrap_err();
        assert!(matches!(err, CompressionError::ContentSizeMismatch { .. }));
    }

    #[test]
    fn chunking_does_not_matter() {
        let data = sample();
        let mut settings = CompressionSettings::default();
        settings.block_size(BlockSize::Max64KB).independent_blocks(false).block_checksums(true);

        let mut whole = Vec::new();
        settings.compress(&data[..], &mut whole).unwrap();

        let mut encoder = settings.encoder().unwrap();
        let mut pieces = Vec::new();
        for chunk in data.chunks(777) {
            encoder.update_into(chunk, &mut pieces).unwrap();
        }
        encoder.finish_into(&mut pieces).unwrap();
        assert_eq!(pieces, whole);
    }

    #[test]
    fn linked_blocks_compress_better() {
        let data = sample();
        let mut independent = Vec::new();
        CompressionSettings::default().block_size(BlockSize::Max64KB).compress(&data[..], &mut independent).unwrap();
        let mut linked = Vec::new();
        CompressionSettings::default()
            .block_size(BlockSize::Max64KB)
            .independent_blocks(false)
            .compress(&data[..], &mut linked)
            .unwrap();
        assert!(linked.len() < independent.len());
        assert_eq!(decompress_frame(&linked[..]).unwrap(), data);
    }

    #[test]
    fn io_errors_are_classified() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(IoErrorKind::Other, "nope"))
            }
        }
        let err = CompressionSettings::default().compress(Broken, Vec::new()).unwrap_err();
        assert!(matches!(err, CompressionError::ReadError(_)));
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
