use std::path::Path;

use notatin::parser_builder::ParserBuilder;
use serde::Deserialize;

use crate::error::OrcError;
use crate::event::Event;

use super::{read_sidecar_json, Plugin, PluginContext};

/// Registry hive parser. The underlying library is historically not
/// thread-safe, so this family is registered with `thread_unsafe: true` in
/// `plugin::family_for` and all its instances share one mutex.
#[derive(Debug, Deserialize, Clone, Default)]
struct ImportantKeys {
    keys: Vec<String>,
}

pub struct RegistryPlugin {
    hostname: String,
    source_type: String,
    important_keys: Vec<String>,
}

pub fn construct(ctx: &PluginContext) -> Box<dyn Plugin> {
    let important_keys =
        read_sidecar_json(&ctx.install_dir, "important_keys.json", ImportantKeys::default()).keys;
    Box::new(RegistryPlugin {
        hostname: ctx.hostname.clone(),
        source_type: ctx.source_type.clone(),
        important_keys,
    })
}

impl Plugin for RegistryPlugin {
    fn parse_artefact(
        &mut self,
        path: &Path,
        source_hint: &str,
        emit: &mut dyn FnMut(Event),
    ) -> Result<(), OrcError> {
        let mut parser = ParserBuilder::from_path(path)
            .build()
            .map_err(|e| OrcError::Parse(format!("opening hive {}: {e:?}", path.display())))?;

        let source = source_hint.to_string();

        for key_path in &self.important_keys {
            match parser.get_key(key_path, false) {
                Ok(Some(key)) => {
                    emit(Event::new(
                        key.last_key_written_date_and_time,
                        self.hostname.clone(),
                        self.source_type.clone(),
                        format!("registry key {key_path} last written"),
                        source.clone(),
                    ));
                }
                Ok(None) => {
                    log::debug!("{}: key not present: {key_path}", path.display());
                }
                Err(e) => {
                    log::warn!("{}: error reading key {key_path}: {e:?}", path.display());
                }
            }
        }

        Ok(())
    }
}
