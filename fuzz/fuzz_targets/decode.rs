#![no_main]
use libfuzzer_sys::fuzz_target;
use lz4_engine::framed::{FrameDecoder, LZ4FrameReader};
use std::io::{Cursor, Read};

fuzz_target!(|data: &[u8]| {
    // we deliberately ignore errors here because random bytes from fuzzer
    // are not valid LZ4 data and so are expected to trigger non-fatal errors
    let mut output = Vec::new();
    if let Ok(reader) = LZ4FrameReader::new(Cursor::new(data)) {
        let _ = reader.into_read().read_to_end(&mut output);
    }

    // same input through the push decoder, split in two
    let (head, tail) = data.split_at(data.len() / 2);
    let mut decoder = FrameDecoder::new();
    let mut output = Vec::new();
    if decoder.update_into(head, &mut output).is_ok() {
        let _ = decoder.update_into(tail, &mut output);
    }

    let _ = lz4_engine::raw::decompress_block(data, 1 << 20);
});
