use std::collections::HashMap;
use std::path::Path;

use evtx::EvtxParser;

use crate::error::OrcError;
use crate::event::Event;

use super::{read_sidecar_json, Plugin, PluginContext};

/// Windows Event Log parser. Labels come from a per-plugin sidecar
/// (event ID -> human label) rather than a hardcoded map, so
/// new event sources don't require a code change.
pub struct EvtxPlugin {
    hostname: String,
    source_type: String,
    labels: HashMap<String, String>,
}

pub fn construct(ctx: &PluginContext) -> Box<dyn Plugin> {
    let labels: HashMap<String, String> =
        read_sidecar_json(&ctx.install_dir, "event_labels.json", HashMap::new());
    Box::new(EvtxPlugin {
        hostname: ctx.hostname.clone(),
        source_type: ctx.source_type.clone(),
        labels,
    })
}

fn event_id(data: &serde_json::Value) -> Option<u64> {
    let id = &data["Event"]["System"]["EventID"];
    id.as_u64().or_else(|| {
        id.get("#text")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
    })
}

impl Plugin for EvtxPlugin {
    fn parse_artefact(
        &mut self,
        path: &Path,
        source_hint: &str,
        emit: &mut dyn FnMut(Event),
    ) -> Result<(), OrcError> {
        let mut parser = EvtxParser::from_path(path)
            .map_err(|e| OrcError::Parse(format!("opening {}: {e}", path.display())))?;

        let source = source_hint.to_string();

        for record in parser.records_json_value() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("skipping malformed EVTX record in {}: {e}", path.display());
                    continue;
                }
            };

            let description = event_id(&record.data)
                .and_then(|id| {
                    self.labels
                        .get(&id.to_string())
                        .cloned()
                        .or(Some(format!("EventID {id}")))
                })
                .unwrap_or_else(|| "EVTX record".to_string());

            emit(Event::new(
                record.timestamp,
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

    #[test]
    fn looks_up_event_id_in_nested_value() {
        let v: serde_json::Value = serde_json::json!({
            "Event": {"System": {"EventID": 4624}}
        });
        assert_eq!(event_id(&v), Some(4624));

        let v2: serde_json::Value = serde_json::json!({
            "Event": {"System": {"EventID": {"#text": "4625"}}}
        });
        assert_eq!(event_id(&v2), Some(4625));
    }
}
