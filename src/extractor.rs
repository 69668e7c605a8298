use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use regex::Regex;
use sevenz_rust2::{Archive, ArchiveReader, Password};

use crate::config::DIRECT_SUB_ARCHIVE;
use crate::error::OrcError;

/// One inner artefact materialised to disk. `source_hint` is what a plugin
/// should record as `Event.source`: the sidecar-recovered original Windows
/// path when one exists, falling back to the raw in-archive member name.
/// Both are stable across runs; `path` (the scratch-disk location) is not,
/// since the scratch root's name is randomised per run, so it must never be
/// used as a fallback for `source_hint`.
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    pub path: PathBuf,
    pub member_name: String,
    pub original_path_hint: Option<String>,
}

impl ExtractedFile {
    pub fn source_hint(&self) -> &str {
        self.original_path_hint.as_deref().unwrap_or(&self.member_name)
    }
}

fn sanitize_member_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Reads every non-directory, non-empty member's content from a 7z archive
/// via selective per-file decompression (never inflates the whole archive).
fn read_selected_members(
    archive_path: &Path,
    names: &[&str],
) -> Result<HashMap<String, Vec<u8>>, OrcError> {
    let mut reader = ArchiveReader::open(archive_path, Password::empty()).map_err(|e| {
        OrcError::Extraction(format!(
            "opening archive {}: {e}",
            archive_path.display()
        ))
    })?;

    let mut out = HashMap::with_capacity(names.len());
    for name in names {
        match reader.read_file(name) {
            Ok(bytes) => {
                out.insert((*name).to_string(), bytes);
            }
            Err(e) => {
                log::warn!(
                    "extraction: skipping unreadable member {name} in {}: {e}",
                    archive_path.display()
                );
            }
        }
    }
    Ok(out)
}

/// Writes `bytes` to a unique path under `scratch_dir`, deduplicating by
/// basename with a counter suffix for archives that reuse member names.
fn materialise(
    scratch_dir: &Path,
    member_name: &str,
    bytes: &[u8],
    counters: &mut HashMap<String, usize>,
) -> Result<PathBuf, OrcError> {
    let base = sanitize_member_name(member_name);
    let count = counters.entry(base.clone()).or_insert(0);
    let file_name = if *count == 0 {
        base.clone()
    } else {
        format!("{base}.{count}")
    };
    *count += 1;

    let out_path = scratch_dir.join(file_name);
    let mut f = std::fs::File::create(&out_path)
        .map_err(|e| OrcError::Extraction(format!("creating {}: {e}", out_path.display())))?;
    f.write_all(bytes)
        .map_err(|e| OrcError::Extraction(format!("writing {}: {e}", out_path.display())))?;
    Ok(out_path)
}

/// Enumerates a 7z archive's member list without decompressing anything.
fn list_members(archive_path: &Path) -> Result<Vec<(String, bool, u64)>, OrcError> {
    let archive = Archive::open(archive_path).map_err(|e| {
        OrcError::Extraction(format!("opening archive {}: {e}", archive_path.display()))
    })?;
    Ok(archive
        .files
        .iter()
        .map(|f| (f.name().to_string(), f.is_directory(), f.size()))
        .collect())
}

/// Given a matched inner member, look for a DFIR-ORC path sidecar
/// (`<member>.path`, plain text) in the same container and record it.
fn recover_original_path(members: &HashMap<String, Vec<u8>>, member_name: &str) -> Option<String> {
    members
        .get(&format!("{member_name}.path"))
        .and_then(|bytes| String::from_utf8(bytes.clone()).ok())
        .map(|s| s.trim().to_string())
}

/// Opens the outer archive, optionally descends
/// into a named sub-archive, regex-matches inner member names, and applies
/// an optional header-bytes filter after extraction.
pub fn extract_matching(
    outer_path: &Path,
    sub_archive: &str,
    pattern: &Regex,
    file_header: Option<&[u8]>,
    scratch_dir: &Path,
) -> Result<Vec<ExtractedFile>, OrcError> {
    let mut counters = HashMap::new();
    let mut results = Vec::new();

    if sub_archive == DIRECT_SUB_ARCHIVE {
        extract_from_container(outer_path, pattern, file_header, scratch_dir, &mut counters, &mut results)?;
        return Ok(results);
    }

    let outer_members = list_members(outer_path)?;
    let candidates: Vec<&str> = outer_members
        .iter()
        .filter(|(name, is_dir, size)| {
            !is_dir
                && *size > 0
                && Path::new(name)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n == sub_archive)
                    .unwrap_or(false)
        })
        .map(|(name, ..)| name.as_str())
        .collect();

    if candidates.is_empty() {
        return Ok(results);
    }

    let bytes = read_selected_members(outer_path, &candidates)?;
    for name in candidates {
        let Some(sub_bytes) = bytes.get(name) else {
            continue;
        };
        let nested_path = match materialise(scratch_dir, name, sub_bytes, &mut counters) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("extraction: could not stage sub-archive {name}: {e}");
                continue;
            }
        };

        if let Err(e) = extract_from_container(
            &nested_path,
            pattern,
            file_header,
            scratch_dir,
            &mut counters,
            &mut results,
        ) {
            log::warn!(
                "extraction: skipping corrupt sub-archive {}: {e}",
                nested_path.display()
            );
        }
    }

    Ok(results)
}

fn extract_from_container(
    container_path: &Path,
    pattern: &Regex,
    file_header: Option<&[u8]>,
    scratch_dir: &Path,
    counters: &mut HashMap<String, usize>,
    results: &mut Vec<ExtractedFile>,
) -> Result<(), OrcError> {
    let members = list_members(container_path)?;
    let matching: Vec<&str> = members
        .iter()
        .filter(|(name, is_dir, size)| !is_dir && *size > 0 && pattern.is_match(name))
        .map(|(name, ..)| name.as_str())
        .collect();

    if matching.is_empty() {
        return Ok(());
    }

    // A path sidecar (`<member>.path`) doesn't itself match the plugin's
    // pattern, so it has to be requested alongside its matching member
    // rather than relying on the pattern to select it too.
    let mut to_read_owned: Vec<String> = matching.iter().map(|n| n.to_string()).collect();
    to_read_owned.extend(matching.iter().map(|n| format!("{n}.path")));
    let to_read: Vec<&str> = to_read_owned.iter().map(|s| s.as_str()).collect();

    let bytes = read_selected_members(container_path, &to_read)?;
    for name in &matching {
        let Some(data) = bytes.get(*name) else {
            continue;
        };
        let out_path = match materialise(scratch_dir, name, data, counters) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("extraction: skipping member {name}: {e}");
                continue;
            }
        };

        if let Some(header) = file_header {
            if !data.starts_with(header) {
                let _ = std::fs::remove_file(&out_path);
                continue;
            }
        }

        let original_path_hint = recover_original_path(&bytes, name);
        results.push(ExtractedFile {
            path: out_path,
            member_name: (*name).to_string(),
            original_path_hint,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_unsafe_chars() {
        assert_eq!(sanitize_member_name("a/b\\c:d*e"), "a_b_c_d_e");
    }

    #[test]
    fn source_hint_falls_back_to_member_name_not_scratch_path() {
        let f = ExtractedFile {
            path: PathBuf::from("/tmp/orc2timeline-A.dom-xyz123/NTFSInfo.csv"),
            member_name: "General/NTFSInfo/NTFSInfo.csv".to_string(),
            original_path_hint: None,
        };
        assert_eq!(f.source_hint(), "General/NTFSInfo/NTFSInfo.csv");
    }

    #[test]
    fn source_hint_prefers_recovered_path_sidecar() {
        let f = ExtractedFile {
            path: PathBuf::from("/tmp/orc2timeline-A.dom-xyz123/NTFSInfo.csv"),
            member_name: "General/NTFSInfo/NTFSInfo.csv".to_string(),
            original_path_hint: Some("C:\\Windows\\System32\\config\\SAM".to_string()),
        };
        assert_eq!(f.source_hint(), "C:\\Windows\\System32\\config\\SAM");
    }

    #[test]
    fn path_sidecar_is_fetched_even_though_it_never_matches_the_pattern() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("SAM"), b"hive bytes").unwrap();
        std::fs::write(
            src.path().join("SAM.path"),
            b"C:\\Windows\\System32\\config\\SAM",
        )
        .unwrap();

        let archive_path = tempfile::tempdir().unwrap().path().join("Hive.7z");
        sevenz_rust2::compress_to_path(src.path(), &archive_path).unwrap();

        let scratch = tempfile::tempdir().unwrap();
        let pattern = Regex::new("^SAM$").unwrap();
        let extracted =
            extract_matching(&archive_path, DIRECT_SUB_ARCHIVE, &pattern, None, scratch.path()).unwrap();

        assert_eq!(extracted.len(), 1);
        assert_eq!(
            extracted[0].original_path_hint.as_deref(),
            Some("C:\\Windows\\System32\\config\\SAM")
        );
    }

    #[test]
    fn materialise_deduplicates_repeated_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut counters = HashMap::new();
        let p1 = materialise(dir.path(), "x.evtx", b"aaa", &mut counters).unwrap();
        let p2 = materialise(dir.path(), "x.evtx", b"bbb", &mut counters).unwrap();
        assert_ne!(p1, p2);
        assert_eq!(std::fs::read(p1).unwrap(), b"aaa");
        assert_eq!(std::fs::read(p2).unwrap(), b"bbb");
    }
}
