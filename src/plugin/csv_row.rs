use std::path::Path;

use serde::Deserialize;

use crate::error::OrcError;
use crate::event::{parse_permissive, Event};

use super::{read_sidecar_json, Plugin, PluginContext};

/// DFIR-ORC's own CSV-producing parsers: NTFSInfo, USNInfo, I30Info. Each
/// extracted file is itself a CSV whose timestamp/description columns are
/// named in a per-plugin sidecar rather than hardcoded.
#[derive(Debug, Deserialize, Clone)]
struct CsvLayout {
    timestamp_column: String,
    description_columns: Vec<String>,
}

impl Default for CsvLayout {
    fn default() -> Self {
        CsvLayout {
            timestamp_column: "timestamp".to_string(),
            description_columns: vec!["description".to_string()],
        }
    }
}

pub struct CsvRowPlugin {
    hostname: String,
    source_type: String,
    layout: CsvLayout,
}

pub fn construct(ctx: &PluginContext) -> Box<dyn Plugin> {
    let layout = read_sidecar_json(&ctx.install_dir, "timestamp_column.json", CsvLayout::default());
    Box::new(CsvRowPlugin {
        hostname: ctx.hostname.clone(),
        source_type: ctx.source_type.clone(),
        layout,
    })
}

impl Plugin for CsvRowPlugin {
    fn parse_artefact(
        &mut self,
        path: &Path,
        source_hint: &str,
        emit: &mut dyn FnMut(Event),
    ) -> Result<(), OrcError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|e| OrcError::Parse(format!("opening {}: {e}", path.display())))?;

        let headers = rdr
            .headers()
            .map_err(|e| OrcError::Parse(format!("reading headers of {}: {e}", path.display())))?
            .clone();

        let ts_idx = headers.iter().position(|h| h == self.layout.timestamp_column);
        let Some(ts_idx) = ts_idx else {
            return Err(OrcError::Parse(format!(
                "{}: missing timestamp column {}",
                path.display(),
                self.layout.timestamp_column
            )));
        };
        let desc_idxs: Vec<usize> = self
            .layout
            .description_columns
            .iter()
            .filter_map(|name| headers.iter().position(|h| h == name))
            .collect();

        let source = source_hint.to_string();

        for record in rdr.records() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("skipping malformed row in {}: {e}", path.display());
                    continue;
                }
            };
            let Some(ts_str) = record.get(ts_idx) else {
                continue;
            };
            let Some(timestamp) = parse_permissive(ts_str) else {
                log::debug!("dropping row with unparseable timestamp {ts_str:?} in {}", path.display());
                continue;
            };
            let description = desc_idxs
                .iter()
                .filter_map(|&i| record.get(i))
                .collect::<Vec<_>>()
                .join(", ");

            emit(Event::new(
                timestamp,
                self.hostname.clone(),
                self.source_type.clone(),
                description,
                source.clone(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn emits_one_event_per_valid_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("NTFSInfo.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "LastModificationDate,File").unwrap();
        writeln!(f, "2023-04-05 06:07:08.000,C:\\Windows\\system32\\a.dll").unwrap();
        writeln!(f, "not-a-date,C:\\Windows\\system32\\b.dll").unwrap();

        let mut plugin = CsvRowPlugin {
            hostname: "A.dom".into(),
            source_type: "NTFSInfo".into(),
            layout: CsvLayout {
                timestamp_column: "LastModificationDate".into(),
                description_columns: vec!["File".into()],
            },
        };

        let mut events = Vec::new();
        plugin
            .parse_artefact(&path, "NTFSInfo.csv", &mut |e| events.push(e))
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source_type, "NTFSInfo");
        assert!(events[0].description.contains("a.dll"));
    }
}
