use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::archive_index::ArchiveType;
use crate::error::OrcError;

/// Parses `DFIR-ORC_<role>_<hostname>_<type>.7z`: the hostname is the
/// second-to-last `_`-delimited token once the `.7z` extension is stripped,
/// the archive type is the last token.
pub fn parse_orc_filename(path: &Path) -> Result<(String, ArchiveType), OrcError> {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| OrcError::BadInput(format!("not a valid filename: {}", path.display())))?;

    let stem = file_name.strip_suffix(".7z").unwrap_or(file_name);
    if stem == file_name {
        return Err(OrcError::BadInput(format!(
            "expected a .7z outer archive: {}",
            path.display()
        )));
    }

    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 4 || parts[0] != "DFIR-ORC" {
        return Err(OrcError::BadInput(format!(
            "does not match DFIR-ORC_<role>_<hostname>_<type>.7z: {}",
            path.display()
        )));
    }

    let archive_type = parts[parts.len() - 1].to_string();
    let hostname = parts[parts.len() - 2].to_string();
    Ok((hostname, ArchiveType::new(archive_type)))
}

/// Groups a flat list of outer archive paths by inferred hostname. Fails
/// fast on the first path that doesn't match the ORC filename pattern.
pub fn group_by_host(
    paths: &[PathBuf],
) -> Result<BTreeMap<String, Vec<(ArchiveType, PathBuf)>>, OrcError> {
    let mut groups: BTreeMap<String, Vec<(ArchiveType, PathBuf)>> = BTreeMap::new();
    for path in paths {
        let (hostname, archive_type) = parse_orc_filename(path)?;
        groups
            .entry(hostname)
            .or_default()
            .push((archive_type, path.clone()));
    }
    Ok(groups)
}

/// Groups a file list that the caller intends as a single host's job; fails
/// with `BadInput` if more than one hostname is present, per `process`'s
/// single-host contract.
pub fn group_single_host(
    paths: &[PathBuf],
) -> Result<(String, Vec<(ArchiveType, PathBuf)>), OrcError> {
    let groups = group_by_host(paths)?;
    if groups.len() > 1 {
        let hosts: Vec<&String> = groups.keys().collect();
        let joined = hosts
            .iter()
            .map(|h| h.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(OrcError::BadInput(format!(
            "all files must belong to the same host; parsed hosts: {{{joined}}}"
        )));
    }
    groups
        .into_iter()
        .next()
        .ok_or_else(|| OrcError::BadInput("no input files given".to_string()))
}

/// Recursively walks `dir`, collects `*.7z` files, and groups them by host.
pub fn group_dir_by_host(
    dir: &Path,
) -> Result<BTreeMap<String, Vec<(ArchiveType, PathBuf)>>, OrcError> {
    let mut paths = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("7z")
        {
            paths.push(entry.path().to_path_buf());
        }
    }
    group_by_host(&paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_multi_host_grouping() {
        let paths = vec![
            PathBuf::from("DFIR-ORC_S_A.dom_General.7z"),
            PathBuf::from("DFIR-ORC_S_A.dom_Little.7z"),
            PathBuf::from("DFIR-ORC_S_B.dom_Offline.7z"),
        ];
        let groups = group_by_host(&paths).unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups.contains_key("A.dom"));
        assert!(groups.contains_key("B.dom"));
        assert_eq!(groups["A.dom"].len(), 2);
        assert_eq!(groups["B.dom"].len(), 1);

        let err = group_single_host(&paths).unwrap_err();
        match err {
            OrcError::BadInput(msg) => {
                assert!(msg.contains("A.dom"));
                assert!(msg.contains("B.dom"));
            }
            other => panic!("expected BadInput, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_matching_filename() {
        let err = parse_orc_filename(Path::new("random.7z")).unwrap_err();
        assert!(matches!(err, OrcError::BadInput(_)));
    }

    #[test]
    fn single_host_ok() {
        let paths = vec![
            PathBuf::from("DFIR-ORC_S_A.dom_General.7z"),
            PathBuf::from("DFIR-ORC_S_A.dom_Little.7z"),
        ];
        let (host, members) = group_single_host(&paths).unwrap();
        assert_eq!(host, "A.dom");
        assert_eq!(members.len(), 2);
    }
}
