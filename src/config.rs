use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::archive_index::ArchiveType;
use crate::error::OrcError;

/// One `<PluginName>: {...}` entry of the `Plugins` YAML sequence.
#[derive(Debug, Deserialize)]
struct RawPluginSpec {
    archives: Vec<String>,
    #[serde(default)]
    sub_archives: Vec<String>,
    match_pattern: String,
    source_type: String,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "Plugins")]
    plugins: Vec<std::collections::HashMap<String, RawPluginSpec>>,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
}

fn default_chunk_size() -> usize {
    500_000
}

/// Marker used in place of an empty `sub_archives` set: the artefact sits in
/// the outer archive directly.
pub const DIRECT_SUB_ARCHIVE: &str = "__direct__";

#[derive(Debug, Clone)]
pub struct PluginSpec {
    pub name: String,
    pub archives: BTreeSet<ArchiveType>,
    /// Empty iff the artefact sits in the outer archive directly; callers
    /// should treat that case as the singleton `[DIRECT_SUB_ARCHIVE]`.
    pub sub_archives: BTreeSet<String>,
    pub match_pattern: Regex,
    pub source_type: String,
}

impl PluginSpec {
    pub fn sub_archives_or_direct(&self) -> BTreeSet<String> {
        if self.sub_archives.is_empty() {
            let mut s = BTreeSet::new();
            s.insert(DIRECT_SUB_ARCHIVE.to_string());
            s
        } else {
            self.sub_archives.clone()
        }
    }
}

/// Accumulator for entries sharing one `name` while `Config::from_yaml_str`
/// walks the `Plugins` list; turned into a single `PluginSpec` once all
/// entries have been folded in.
struct MergedSpec {
    archives: BTreeSet<ArchiveType>,
    sub_archives: BTreeSet<String>,
    match_patterns: Vec<String>,
    source_type: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub plugins: Vec<PluginSpec>,
    pub chunk_size: usize,
}

impl Config {
    pub fn from_yaml_str(text: &str) -> Result<Self, OrcError> {
        let raw: RawConfig = serde_yaml::from_str(text)
            .map_err(|e| OrcError::Config(format!("invalid YAML: {e}")))?;

        // Entries keep YAML's `Plugins` order; multiple entries sharing a
        // name are merged below rather than kept as separate specs, so a
        // name's archives/sub_archives/match_pattern are always the union
        // of every entry that named it.
        let mut order: Vec<String> = Vec::new();
        let mut merged: std::collections::HashMap<String, MergedSpec> = std::collections::HashMap::new();

        for entry in raw.plugins {
            if entry.len() != 1 {
                return Err(OrcError::Config(format!(
                    "each Plugins entry must be a single-key mapping, got {} keys",
                    entry.len()
                )));
            }
            let (name, spec) = entry.into_iter().next().expect("checked len == 1");

            if spec.archives.is_empty() {
                return Err(OrcError::Config(format!(
                    "plugin {name}: archives must be non-empty"
                )));
            }
            if spec.source_type.is_empty() {
                return Err(OrcError::Config(format!(
                    "plugin {name}: source_type must be non-empty"
                )));
            }
            // Validated eagerly so a bad pattern is reported against the
            // entry that introduced it, even though only the source string
            // is kept for the final merged alternation below.
            Regex::new(&spec.match_pattern)
                .map_err(|e| OrcError::Config(format!("plugin {name}: bad match_pattern: {e}")))?;

            match merged.entry(name.clone()) {
                std::collections::hash_map::Entry::Vacant(v) => {
                    order.push(name.clone());
                    v.insert(MergedSpec {
                        archives: spec.archives.into_iter().map(ArchiveType::new).collect(),
                        sub_archives: spec.sub_archives.into_iter().collect(),
                        match_patterns: vec![spec.match_pattern],
                        source_type: spec.source_type,
                    });
                }
                std::collections::hash_map::Entry::Occupied(mut o) => {
                    let existing = o.get_mut();
                    if existing.source_type != spec.source_type {
                        return Err(OrcError::Config(format!(
                            "plugin {name}: conflicting source_type across entries ({} vs {})",
                            existing.source_type, spec.source_type
                        )));
                    }
                    existing.archives.extend(spec.archives.into_iter().map(ArchiveType::new));
                    existing.sub_archives.extend(spec.sub_archives);
                    existing.match_patterns.push(spec.match_pattern);
                }
            }
        }

        let mut plugins = Vec::with_capacity(order.len());
        for name in order {
            let m = merged.remove(&name).expect("name was just inserted above");
            let combined_pattern = if m.match_patterns.len() == 1 {
                m.match_patterns.into_iter().next().unwrap()
            } else {
                m.match_patterns
                    .into_iter()
                    .map(|p| format!("(?:{p})"))
                    .collect::<Vec<_>>()
                    .join("|")
            };
            let match_pattern = Regex::new(&combined_pattern).map_err(|e| {
                OrcError::Config(format!("plugin {name}: bad merged match_pattern: {e}"))
            })?;

            plugins.push(PluginSpec {
                name,
                archives: m.archives,
                sub_archives: m.sub_archives,
                match_pattern,
                source_type: m.source_type,
            });
        }

        if raw.chunk_size == 0 {
            return Err(OrcError::Config("chunk_size must be positive".into()));
        }

        Ok(Config {
            plugins,
            chunk_size: raw.chunk_size,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OrcError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            OrcError::Config(format!(
                "reading config file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_yaml_str(&text)
    }
}

/// The effective config path: fixed relative to the installation, no flag
/// overrides it. We resolve relative to the running
/// executable so the same binary works from an installed `bin/` layout or a
/// `cargo run` workspace checkout.
pub fn effective_config_path() -> PathBuf {
    let exe = std::env::current_exe().ok();
    if let Some(exe) = exe {
        if let Some(dir) = exe.parent() {
            let installed = dir.join("../share/orc2timeline/plugins.yaml");
            if installed.exists() {
                return installed;
            }
            let sibling = dir.join("config/plugins.yaml");
            if sibling.exists() {
                return sibling;
            }
        }
    }
    PathBuf::from("config/plugins.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
Plugins:
  - NTFSInfo:
      archives: [General, Little]
      sub_archives: [NTFSInfo.7z]
      match_pattern: ".*NTFSInfo.*\\.csv$"
      source_type: NTFSInfo
  - LNK:
      archives: [Detail]
      match_pattern: ".*\\.lnk$"
      source_type: LNK
chunk_size: 10000
"#;

    #[test]
    fn parses_valid_config() {
        let cfg = Config::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(cfg.plugins.len(), 2);
        assert_eq!(cfg.chunk_size, 10000);
        let ntfs = &cfg.plugins[0];
        assert_eq!(ntfs.name, "NTFSInfo");
        assert_eq!(ntfs.archives.len(), 2);
        assert_eq!(ntfs.sub_archives.len(), 1);
        let lnk = &cfg.plugins[1];
        assert!(lnk.sub_archives.is_empty());
        assert_eq!(lnk.sub_archives_or_direct().len(), 1);
    }

    #[test]
    fn rejects_empty_archives() {
        let bad = r#"
Plugins:
  - Bad:
      archives: []
      match_pattern: ".*"
      source_type: Bad
"#;
        let err = Config::from_yaml_str(bad).unwrap_err();
        assert!(matches!(err, OrcError::Config(_)));
    }

    #[test]
    fn rejects_bad_regex() {
        let bad = r#"
Plugins:
  - Bad:
      archives: [General]
      match_pattern: "(unclosed"
      source_type: Bad
"#;
        let err = Config::from_yaml_str(bad).unwrap_err();
        assert!(matches!(err, OrcError::Config(_)));
    }

    #[test]
    fn same_named_entries_merge_archives_and_sub_archives() {
        let cfg = Config::from_yaml_str(
            r#"
Plugins:
  - EVTX:
      archives: [General]
      sub_archives: [Event.7z]
      match_pattern: ".*\\.evtx$"
      source_type: EVTX
  - EVTX:
      archives: [General, Little]
      sub_archives: [Event_Little.7z]
      match_pattern: ".*Security\\.evtx$"
      source_type: EVTX
"#,
        )
        .unwrap();
        assert_eq!(cfg.plugins.len(), 1);
        let evtx = &cfg.plugins[0];
        assert_eq!(evtx.archives.len(), 2);
        assert_eq!(evtx.sub_archives.len(), 2);
        assert!(evtx.match_pattern.is_match("Security.evtx"));
        assert!(evtx.match_pattern.is_match("Application.evtx"));
    }

    #[test]
    fn same_named_entries_with_conflicting_source_type_rejected() {
        let bad = r#"
Plugins:
  - EVTX:
      archives: [General]
      match_pattern: ".*\\.evtx$"
      source_type: EVTX
  - EVTX:
      archives: [Little]
      match_pattern: ".*\\.evtx$"
      source_type: SomethingElse
"#;
        let err = Config::from_yaml_str(bad).unwrap_err();
        assert!(matches!(err, OrcError::Config(_)));
    }

    #[test]
    fn default_chunk_size_applies() {
        let cfg = Config::from_yaml_str(
            r#"
Plugins:
  - X:
      archives: [General]
      match_pattern: ".*"
      source_type: X
"#,
        )
        .unwrap();
        assert_eq!(cfg.chunk_size, 500_000);
    }
}
