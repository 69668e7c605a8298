use std::path::{Path, PathBuf};

use crate::archive_index::PluginInstanceDescriptor;
use crate::cancel::CancellationToken;
use crate::config::{Config, PluginSpec};
use crate::error::OrcError;
use crate::extractor;
use crate::plugin::{self, PluginContext};
use crate::scratch::HostScratch;
use crate::sort::ExternalSorter;

/// Result of running one plugin instance to completion: a partial timeline
/// path on success, or a failure recorded without aborting peer instances.
pub struct InstanceOutcome {
    pub spec_name: String,
    pub partial_path: Option<PathBuf>,
    pub failed: bool,
    pub skipped_files: usize,
}

pub fn plugin_install_dir(config_dir: &Path, plugin_name: &str) -> PathBuf {
    config_dir.join("plugins").join(plugin_name)
}

/// Executes one (spec, archive, sub_archive) triple end to end: extract,
/// parse, sort-and-spill. This is the unit of work the Scheduler dispatches
/// in Phase 1.
pub fn run_instance(
    config: &Config,
    config_dir: &Path,
    spec: &PluginSpec,
    descriptor: &PluginInstanceDescriptor,
    hostname: &str,
    scratch: &HostScratch,
    cancel: &CancellationToken,
) -> InstanceOutcome {
    let label = format!(
        "{}/{}/{}",
        spec.name, descriptor.archive, descriptor.sub_archive
    );

    if cancel.is_cancelled() {
        log::info!("instance {label}: skipped, cancellation requested");
        return InstanceOutcome {
            spec_name: spec.name.clone(),
            partial_path: None,
            failed: false,
            skipped_files: 0,
        };
    }

    let instance_dir = match scratch.instance_dir(&spec.name, &descriptor.archive, &descriptor.sub_archive) {
        Ok(d) => d,
        Err(e) => {
            log::error!("instance {label}: could not allocate scratch dir: {e}");
            return failed_outcome(spec);
        }
    };

    let ctx = PluginContext {
        hostname: hostname.to_string(),
        source_type: spec.source_type.clone(),
        install_dir: plugin_install_dir(config_dir, &spec.name),
    };

    let thread_unsafe = plugin::is_thread_unsafe(&spec.name);
    let family_lock = thread_unsafe.then(|| plugin::family_lock(&spec.name));
    let mut plugin_impl = plugin::construct(&spec.name, &ctx);
    let header = plugin_impl.file_header_filter();

    let extracted = {
        // Non-reentrant parser families still need the lock held only
        // around the actual parse calls below; extraction itself never
        // touches the plugin library, so it runs unlocked.
        extractor::extract_matching(
            &descriptor.outer_path,
            &descriptor.sub_archive,
            &spec.match_pattern,
            header.as_deref(),
            &instance_dir,
        )
    };
    let extracted = match extracted {
        Ok(files) => files,
        Err(e) => {
            log::error!("instance {label}: extraction failed: {e}");
            return failed_outcome(spec);
        }
    };

    let mut sorter = ExternalSorter::new(instance_dir.clone(), config.chunk_size);
    let mut skipped_files = 0usize;

    {
        let _guard = family_lock.as_ref().map(|m| m.lock().expect("family mutex poisoned"));
        for file in &extracted {
            if cancel.is_cancelled() {
                log::info!("instance {label}: cancellation requested, stopping after current file");
                break;
            }
            let mut sink = |ev| {
                if let Err(e) = sorter.push(ev) {
                    log::error!("instance {label}: spill error: {e}");
                }
            };
            if let Err(e) =
                plugin_impl.parse_artefact(&file.path, file.source_hint(), &mut sink)
            {
                log::warn!("instance {label}: parse error on {}: {e}", file.path.display());
                skipped_files += 1;
            }
        }

        let mut sink = |ev| {
            if let Err(e) = sorter.push(ev) {
                log::error!("instance {label}: spill error during finalize: {e}");
            }
        };
        if let Err(e) = plugin_impl.finalize(&mut sink) {
            log::warn!("instance {label}: finalize error: {e}");
        }
    }

    let partial_path = instance_dir.join("partial.txt");
    match sorter.finalize(&partial_path) {
        Ok(()) => InstanceOutcome {
            spec_name: spec.name.clone(),
            partial_path: Some(partial_path),
            failed: false,
            skipped_files,
        },
        Err(e) => {
            log::error!("instance {label}: external sort failed: {e}");
            failed_outcome(spec)
        }
    }
}

fn failed_outcome(spec: &PluginSpec) -> InstanceOutcome {
    InstanceOutcome {
        spec_name: spec.name.clone(),
        partial_path: None,
        failed: true,
        skipped_files: 0,
    }
}

/// Wraps `run_instance` so a plugin panic becomes an `InstanceFailure`
/// instead of taking down the whole worker pool.
pub fn run_instance_catching(
    config: &Config,
    config_dir: &Path,
    spec: &PluginSpec,
    descriptor: &PluginInstanceDescriptor,
    hostname: &str,
    scratch: &HostScratch,
    cancel: &CancellationToken,
) -> InstanceOutcome {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        run_instance(config, config_dir, spec, descriptor, hostname, scratch, cancel)
    }));
    match result {
        Ok(outcome) => outcome,
        Err(_) => {
            log::error!(
                "instance {}/{}/{}: plugin panicked",
                spec.name,
                descriptor.archive,
                descriptor.sub_archive
            );
            failed_outcome(spec)
        }
    }
}
