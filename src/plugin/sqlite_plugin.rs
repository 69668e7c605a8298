use std::collections::HashMap;
use std::path::Path;

use chrono::TimeZone;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::error::OrcError;
use crate::event::{parse_permissive, Event};

use super::{read_sidecar_json, Plugin, PluginContext};

/// SQLite artefact parser (browser history, etc). The table -> timestamp
/// column map lives in a sidecar, not in code, so new browser
/// schemas don't need a rebuild.
pub struct SqlitePlugin {
    hostname: String,
    source_type: String,
    tables: HashMap<String, String>,
}

pub fn construct(ctx: &PluginContext) -> Box<dyn Plugin> {
    let tables: HashMap<String, String> =
        read_sidecar_json(&ctx.install_dir, "tables.json", HashMap::new());
    Box::new(SqlitePlugin {
        hostname: ctx.hostname.clone(),
        source_type: ctx.source_type.clone(),
        tables,
    })
}

fn cell_to_timestamp(value: ValueRef<'_>) -> Option<chrono::DateTime<chrono::Utc>> {
    match value {
        ValueRef::Integer(secs) => chrono::Utc.timestamp_opt(secs, 0).single(),
        ValueRef::Real(secs) => chrono::Utc.timestamp_opt(secs as i64, 0).single(),
        ValueRef::Text(bytes) => parse_permissive(&String::from_utf8_lossy(bytes)),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}

fn cell_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).to_string(),
        ValueRef::Blob(_) => "<blob>".to_string(),
        ValueRef::Null => String::new(),
    }
}

impl Plugin for SqlitePlugin {
    fn parse_artefact(
        &mut self,
        path: &Path,
        source_hint: &str,
        emit: &mut dyn FnMut(Event),
    ) -> Result<(), OrcError> {
        let conn = Connection::open(path)
            .map_err(|e| OrcError::Parse(format!("opening {}: {e}", path.display())))?;

        let source = source_hint.to_string();

        for (table, ts_column) in &self.tables {
            let mut stmt = match conn.prepare(&format!("SELECT * FROM \"{table}\"")) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("{}: table {table} unavailable: {e}", path.display());
                    continue;
                }
            };

            let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let Some(ts_idx) = columns.iter().position(|c| c == ts_column) else {
                log::warn!("{}: table {table} has no column {ts_column}", path.display());
                continue;
            };

            let mut rows = match stmt.query([]) {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("{}: querying table {table}: {e}", path.display());
                    continue;
                }
            };

            while let Ok(Some(row)) = rows.next() {
                let Ok(ts_ref) = row.get_ref(ts_idx) else {
                    continue;
                };
                let Some(timestamp) = cell_to_timestamp(ts_ref) else {
                    continue;
                };

                let description = columns
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != ts_idx)
                    .filter_map(|(i, name)| {
                        row.get_ref(i)
                            .ok()
                            .map(|v| format!("{name}={}", cell_to_string(v)))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");

                emit(Event::new(
                    timestamp,
                    self.hostname.clone(),
                    self.source_type.clone(),
                    format!("{table}: {description}"),
                    source.clone(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_cell_treated_as_unix_epoch_seconds() {
        let ts = cell_to_timestamp(ValueRef::Integer(0)).unwrap();
        assert_eq!(ts.to_rfc3339(), "1970-01-01T00:00:00+00:00");
    }
}
