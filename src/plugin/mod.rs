mod csv_row;
mod evtx_plugin;
mod raw_header;
mod registry_plugin;
mod sqlite_plugin;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::error::OrcError;
use crate::event::Event;

/// Capability set every artefact parser satisfies. The core
/// guarantees `parse_artefact` is called exactly once per matching file;
/// plugins never open archives themselves.
pub trait Plugin: Send {
    fn file_header_filter(&self) -> Option<Vec<u8>> {
        None
    }

    /// `source_hint` is the value to record as `Event.source`: the
    /// sidecar-recovered original path when one exists, otherwise the raw
    /// in-archive member name. Never the scratch-disk `path` below, which is
    /// not stable across runs.
    fn parse_artefact(
        &mut self,
        path: &Path,
        source_hint: &str,
        emit: &mut dyn FnMut(Event),
    ) -> Result<(), OrcError>;

    fn finalize(&mut self, _emit: &mut dyn FnMut(Event)) -> Result<(), OrcError> {
        Ok(())
    }
}

/// Everything a plugin constructor needs, injected by the Plugin Runtime
/// instead of provided via inheritance.
pub struct PluginContext {
    pub hostname: String,
    pub source_type: String,
    /// `<config_dir>/plugins/<spec.name>/` — where a plugin's auxiliary
    /// sidecar files live.
    pub install_dir: PathBuf,
}

pub type PluginCtor = fn(&PluginContext) -> Box<dyn Plugin>;

pub struct PluginFamily {
    /// Families backed by a parser library known not to be reentrant
    /// (registry/EVTX libraries historically) share one mutex across all
    /// their instances, supplied at construction.
    pub thread_unsafe: bool,
    pub ctor: PluginCtor,
}

/// Dispatches on the plugin's configured `name`. Names that don't match a
/// built-in family fall back to the generic header-filter-driven raw
/// plugin, so a custom config entry still produces something runnable.
fn family_for(name: &str) -> PluginFamily {
    match name {
        "NTFSInfo" | "USNInfo" | "I30Info" => PluginFamily {
            thread_unsafe: false,
            ctor: csv_row::construct,
        },
        "EVTX" => PluginFamily {
            thread_unsafe: false,
            ctor: evtx_plugin::construct,
        },
        "Registry" => PluginFamily {
            thread_unsafe: true,
            ctor: registry_plugin::construct,
        },
        "SQLite" => PluginFamily {
            thread_unsafe: false,
            ctor: sqlite_plugin::construct,
        },
        _ => PluginFamily {
            thread_unsafe: false,
            ctor: raw_header::construct,
        },
    }
}

pub fn is_thread_unsafe(name: &str) -> bool {
    family_for(name).thread_unsafe
}

pub fn construct(name: &str, ctx: &PluginContext) -> Box<dyn Plugin> {
    (family_for(name).ctor)(ctx)
}

static FAMILY_LOCKS: Lazy<Mutex<HashMap<String, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// One mutex per plugin family, not one global mutex, so unrelated plugin
/// families never serialise against each other.
pub fn family_lock(name: &str) -> Arc<Mutex<()>> {
    let mut map = FAMILY_LOCKS.lock().expect("family lock map poisoned");
    map.entry(name.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Reads a JSON sidecar from a plugin's install directory, falling back to
/// `default` (with a debug log) when it's absent or malformed.
pub fn read_sidecar_json<T: serde::de::DeserializeOwned>(
    install_dir: &Path,
    file_name: &str,
    default: T,
) -> T {
    let path = install_dir.join(file_name);
    match std::fs::read_to_string(&path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("malformed sidecar {}: {e}, using default", path.display());
                default
            }
        },
        Err(_) => {
            log::debug!("no sidecar {}, using default", path.display());
            default
        }
    }
}
