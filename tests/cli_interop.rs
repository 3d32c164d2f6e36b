//! Cross-checks against the reference `lz4` command line tool.
//! Every test here passes trivially when `lz4` is not installed.

use lz4_engine::framed::{decompress_frame, decompress_frame_with_dictionary, BlockSize, CompressionSettings};
use std::io::Write;
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;

fn lz4_available() -> bool {
    Command::new("lz4")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn run_cmd(flags: &[&str], input: &[u8]) -> Vec<u8> {
    let mut child = Command::new("lz4")
        .args(flags)
        .args(&["-c", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    let input = input.to_vec();
    let feeder = std::thread::spawn(move || stdin.write_all(&input).unwrap());
    let output = child.wait_with_output().unwrap();
    feeder.join().unwrap();

    assert!(output.status.success(), "lz4 {:?} failed", flags);
    output.stdout
}

fn test_data() -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..40_000u32 {
        data.extend_from_slice(format!("{:08} {}\n", i * 7919 % 100_003, i % 17).as_bytes());
    }
    data
}

static DICT_DATA: &[u8] = b"00012345 3\n00067890 11\n00011111 0\n";

#[test]
fn reference_decodes_our_frames() {
    if !lz4_available() {
        return;
    }

    let data = test_data();
    let dict_file = {
        let mut f = NamedTempFile::new().expect("Error creating temporary file");
        f.write_all(DICT_DATA).expect("Error writing DICT_DATA");
        f
    };
    let dict_path = dict_file.path().to_str().unwrap();

    let mut failed_runs = Vec::new();
    for bits in 0..(1 << 5) {
        let mut settings = CompressionSettings::default();
        let mut args = vec!["-d"];

        if bits & 1 != 0 {
            settings.content_checksum(false);
        }
        if bits & 2 != 0 {
            settings.independent_blocks(false);
        }
        if bits & 4 != 0 {
            settings.block_size(BlockSize::Max64KB);
        }
        if bits & 8 != 0 {
            settings.dictionary(0, DICT_DATA).dictionary_id(None);
            args.extend(&["-D", dict_path]);
        }

        let mut frame = Vec::new();
        if bits & 16 != 0 {
            settings.compress_with_size(std::io::Cursor::new(&data), &mut frame).unwrap();
        } else {
            settings.compress(&data[..], &mut frame).unwrap();
        }

        if run_cmd(&args, &frame) != data {
            failed_runs.push(bits);
        }
    }
    assert!(failed_runs.is_empty(), "failed: {:?}", failed_runs);
}

#[test]
fn we_decode_reference_frames() {
    if !lz4_available() {
        return;
    }

    let data = test_data();
    for flags in &[
        &[][..],
        &["-9"][..],
        &["-B4", "-BD"][..],
        &["-B5", "--content-size", "--no-frame-crc"][..],
        &["-BX", "-B4"][..],
        &["--fast=3"][..],
    ] {
        let frame = run_cmd(flags, &data);
        assert_eq!(decompress_frame(&frame[..]).unwrap(), data, "lz4 {:?}", flags);
    }
}

#[test]
fn we_decode_reference_dictionary_frames() {
    if !lz4_available() {
        return;
    }

    let dict_file = {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(DICT_DATA).unwrap();
        f
    };
    let data = test_data();
    let frame = run_cmd(&["-D", dict_file.path().to_str().unwrap()], &data);
    assert_eq!(decompress_frame_with_dictionary(&frame[..], DICT_DATA).unwrap(), data);
}
