//! Fixture-building helpers shared by the end-to-end scenario tests. These
//! build real 7z archives on disk via `sevenz_rust2::compress_to_path` so the
//! tests drive the actual Selective Extractor's archive-reading code rather
//! than a stand-in.

use std::fs;
use std::io::Read;
use std::path::Path;

/// Writes `contents` to `dir/rel`, creating parent directories as needed.
pub fn write_file(dir: &Path, rel: &str, contents: &[u8]) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// Compresses every file under `src_dir` into a 7z archive at `dest`; member
/// names are the paths relative to `src_dir`.
pub fn build_archive(src_dir: &Path, dest: &Path) {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    sevenz_rust2::compress_to_path(src_dir, dest).expect("build fixture 7z archive");
}

/// An `NTFSInfo`-style CSV with a `Timestamp`/`File` header, one row per pair.
pub fn ntfsinfo_csv(rows: &[(&str, &str)]) -> String {
    let mut s = String::from("Timestamp,File\n");
    for (ts, file) in rows {
        s.push_str(ts);
        s.push(',');
        s.push_str(file);
        s.push('\n');
    }
    s
}

pub const NTFSINFO_LAYOUT_JSON: &str =
    r#"{"timestamp_column":"Timestamp","description_columns":["File"]}"#;

/// Decodes a hex string with no separators into raw bytes.
pub fn hex_decode(hex: &str) -> Vec<u8> {
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
        .collect()
}

/// A minimal raw artefact record matching `RawLayout`'s default-ish shape
/// used by the header-filter scenario: a 20-byte magic, an 8-byte LE
/// FILETIME at offset 20, and a fixed-length UTF-16LE path at offset 32.
pub const LNK_MAGIC_HEX: &str = "4C0000000114020000000000C000000000000046";
pub const LNK_FILETIME_2021_01_01: u64 = 132_539_328_000_000_000;

pub fn lnk_record(genuine: bool, path: &str) -> Vec<u8> {
    let path_units: Vec<u16> = path.encode_utf16().collect();
    let path_bytes = path_units.len() * 2;
    let mut bytes = vec![0u8; 32 + path_bytes];

    let magic = hex_decode(LNK_MAGIC_HEX);
    bytes[0..magic.len()].copy_from_slice(&magic);
    if !genuine {
        bytes[0] = 0x00;
    }

    bytes[20..28].copy_from_slice(&LNK_FILETIME_2021_01_01.to_le_bytes());

    for (i, unit) in path_units.iter().enumerate() {
        let le = unit.to_le_bytes();
        bytes[32 + i * 2] = le[0];
        bytes[32 + i * 2 + 1] = le[1];
    }
    bytes
}

pub const LNK_LAYOUT_JSON: &str = r#"{
    "header_filter_hex": "4C0000000114020000000000C000000000000046",
    "timestamp_offset": 20,
    "timestamp_kind": "filetime",
    "path_offset": 32,
    "path_len_bytes": 16
}"#;

/// Reads a `merge_host_timelines` output back into rows of
/// `[timestamp, hostname, source_type, description, source]`.
pub fn read_gz_csv(path: &Path) -> Vec<Vec<String>> {
    let mut bytes = Vec::new();
    fs::File::open(path).unwrap().read_to_end(&mut bytes).unwrap();
    let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
    let mut text = String::new();
    decoder.read_to_string(&mut text).unwrap();
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(text.as_bytes());
    rdr.records()
        .map(|r| r.unwrap().iter().map(|s| s.to_string()).collect())
        .collect()
}
