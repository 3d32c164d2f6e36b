#![no_main]
use libfuzzer_sys::fuzz_target;
use lz4_engine::framed::{decompress_frame, BlockSize, CompressionSettings};

fuzz_target!(|data: &[u8]| {
    // the first byte picks the settings, the rest is the payload
    let (&knobs, payload) = match data.split_first() {
        Some(split) => split,
        None => return,
    };

    let mut settings = CompressionSettings::default();
    settings
        .block_size(BlockSize::Max64KB)
        .independent_blocks(knobs & 1 == 0)
        .block_checksums(knobs & 2 != 0)
        .content_checksum(knobs & 4 != 0)
        .compression_level(i32::from(knobs >> 3) - 8);

    let mut encoder = settings.encoder().expect("Could not create encoder");
    let mut frame = Vec::new();
    for chunk in payload.chunks(1 + usize::from(knobs)) {
        encoder.update_into(chunk, &mut frame).expect("Could not compress input data");
    }
    encoder.finish_into(&mut frame).expect("Could not finish frame");

    let roundtripped = decompress_frame(&frame[..]).expect("Could not read decompressed data");
    assert!(roundtripped.iter().eq(payload));
});
