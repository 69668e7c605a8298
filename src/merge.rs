use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::OrcError;
use crate::sort::{merge_sorted_files, read_events};

/// K-way merges every partial timeline for one host, drops byte-identical
/// adjacent records, and streams the result through gzip to `output_path`
/// as header-less RFC 4180 CSV.
///
/// Writes to a `.tmp` sibling, fsyncs, then renames into place, so a crash
/// or SIGINT never leaves a partially-written file at `output_path` itself.
pub fn merge_host_timelines(
    partials: &[PathBuf],
    output_path: &Path,
    overwrite: bool,
    scratch_dir: &Path,
) -> Result<(), OrcError> {
    if output_path.exists() && !overwrite {
        return Err(OrcError::OutputExists(output_path.to_path_buf()));
    }

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| OrcError::Merge(format!("creating output dir {}: {e}", parent.display())))?;
    }

    let merged_lines = scratch_dir.join("_final_merged.txt");
    merge_sorted_files(partials, &merged_lines)?;
    let events = read_events(&merged_lines)?;
    let _ = std::fs::remove_file(&merged_lines);

    let tmp_path = tmp_sibling(output_path);
    write_gzip_csv(&events, &tmp_path)?;

    std::fs::rename(&tmp_path, output_path).map_err(|e| {
        OrcError::Merge(format!(
            "renaming {} to {}: {e}",
            tmp_path.display(),
            output_path.display()
        ))
    })?;

    for p in partials {
        let _ = std::fs::remove_file(p);
    }

    Ok(())
}

fn tmp_sibling(output_path: &Path) -> PathBuf {
    let mut name = output_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    output_path.with_file_name(name)
}

fn write_gzip_csv(events: &[crate::event::Event], tmp_path: &Path) -> Result<(), OrcError> {
    let file = File::create(tmp_path)
        .map_err(|e| OrcError::Merge(format!("creating {}: {e}", tmp_path.display())))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(encoder);

    for ev in events {
        wtr.write_record([
            ev.timestamp_key(),
            ev.hostname.clone(),
            ev.source_type.clone(),
            ev.description.clone(),
            ev.source.clone(),
        ])
        .map_err(|e| OrcError::Merge(format!("writing CSV row: {e}")))?;
    }

    let encoder = wtr
        .into_inner()
        .map_err(|e| OrcError::Merge(format!("flushing CSV writer: {e}")))?;
    let file = encoder
        .finish()
        .map_err(|e| OrcError::Merge(format!("finishing gzip stream: {e}")))?;
    file.sync_all()
        .map_err(|e| OrcError::Merge(format!("fsyncing {}: {e}", tmp_path.display())))?;
    Ok(())
}
