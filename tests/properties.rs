use lz4_engine::checksum::{checksum, Checksum};
use lz4_engine::framed::{decompress_frame, BlockSize, CompressionSettings, FrameDecoder};
use lz4_engine::raw::{self, compress_bound, BlockSettings};
use proptest::prelude::*;

/// Byte strings that are sometimes random and sometimes full of repeats.
fn payload() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..2000),
        prop::collection::vec(0u8..4, 0..5000),
        (prop::collection::vec(any::<u8>(), 1..40), 1usize..300)
            .prop_map(|(unit, times)| unit.repeat(times)),
    ]
}

/// Split points into `len` bytes, sorted.
fn splits(len: usize, cuts: Vec<usize>) -> Vec<usize> {
    let mut points: Vec<usize> = cuts.into_iter().map(|c| if len == 0 { 0 } else { c % (len + 1) }).collect();
    points.sort_unstable();
    points
}

fn pieces<'a>(data: &'a [u8], points: &[usize]) -> Vec<&'a [u8]> {
    let mut out = Vec::new();
    let mut start = 0;
    for &p in points {
        out.push(&data[start..p]);
        start = p;
    }
    out.push(&data[start..]);
    out
}

proptest! {
    #[test]
    fn block_roundtrip(data in payload(), level in -5i32..13) {
        let compressed = BlockSettings::default()
            .compression_level(level)
            .compress(&data, compress_bound(data.len()))
            .unwrap();
        prop_assert!(compressed.len() <= compress_bound(data.len()));
        prop_assert_eq!(raw::decompress_block(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn frame_roundtrip(data in payload(), linked in any::<bool>(), block_checksums in any::<bool>(), level in -3i32..10) {
        let mut settings = CompressionSettings::default();
        settings
            .block_size(BlockSize::Max64KB)
            .independent_blocks(!linked)
            .block_checksums(block_checksums)
            .compression_level(level);
        let mut frame = Vec::new();
        settings.compress(&data[..], &mut frame).unwrap();
        prop_assert_eq!(decompress_frame(&frame[..]).unwrap(), data);
    }

    #[test]
    fn chunking_never_changes_the_frame(data in payload(), cuts in prop::collection::vec(any::<usize>(), 0..8)) {
        let mut settings = CompressionSettings::default();
        settings.block_size(BlockSize::Max64KB).independent_blocks(false);
        let mut whole = Vec::new();
        settings.compress(&data[..], &mut whole).unwrap();

        let mut encoder = settings.encoder().unwrap();
        let mut frame = Vec::new();
        for piece in pieces(&data, &splits(data.len(), cuts)) {
            encoder.update_into(piece, &mut frame).unwrap();
        }
        encoder.finish_into(&mut frame).unwrap();
        prop_assert_eq!(frame, whole);
    }

    #[test]
    fn decoding_is_resumable_anywhere(data in payload(), cuts in prop::collection::vec(any::<usize>(), 0..16)) {
        let mut frame = Vec::new();
        CompressionSettings::default().block_checksums(true).compress(&data[..], &mut frame).unwrap();

        let mut decoder = FrameDecoder::new();
        let mut output = Vec::new();
        for piece in pieces(&frame, &splits(frame.len(), cuts)) {
            prop_assert_eq!(decoder.update_into(piece, &mut output).unwrap(), piece.len());
        }
        prop_assert!(decoder.is_finished());
        prop_assert_eq!(output, data);
    }

    #[test]
    fn checksum_is_incremental(data in prop::collection::vec(any::<u8>(), 0..500), cuts in prop::collection::vec(any::<usize>(), 0..6)) {
        let mut hasher = Checksum::new();
        for piece in pieces(&data, &splits(data.len(), cuts)) {
            hasher.update(piece);
        }
        prop_assert_eq!(hasher.finish(), checksum(&data));
    }

    #[test]
    fn garbage_never_panics(data in prop::collection::vec(any::<u8>(), 0..300)) {
        let _ = raw::decompress_block(&data, 1 << 16);
        let _ = FrameDecoder::new().update(&data);

        // a valid header followed by garbage
        let mut frame = vec![0x04, 0x22, 0x4D, 0x18, 0x64, 0x40, 0xA7];
        frame.extend_from_slice(&data);
        let _ = decompress_frame(&frame[..]);
    }
}
