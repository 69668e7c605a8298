use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::archive_index::{self, HostBundle};
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::OrcError;
use crate::merge::merge_host_timelines;
use crate::runtime::{self, InstanceOutcome};
use crate::scratch::HostScratch;

/// Outcome of processing one host end to end, returned to `main` for the
/// stderr summary and worst-case exit code.
pub struct HostOutcome {
    pub hostname: String,
    pub written_path: Option<PathBuf>,
    pub instance_failures: usize,
    pub skipped_files: usize,
    pub result: Result<(), OrcError>,
}

/// Bounded two-phase scheduler: Phase 1 runs every plugin instance for a
/// host in parallel (up to `jobs` workers); Phase 2, gated by Phase 1's
/// completion, runs the final merge. Hosts are independent and are fanned
/// out across the same pool, so one host's merge never blocks another
/// host's Phase 1 work queued behind it.
pub struct Scheduler {
    pool: rayon::ThreadPool,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(jobs: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .build()
            .expect("failed to build worker pool");
        Scheduler {
            pool,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs Phase 1 + Phase 2 for one host and returns its outcome. Never
    /// panics the caller: plugin panics are caught per instance, and a
    /// merge failure is reported, not propagated.
    pub fn process_host(
        &self,
        config: &Config,
        config_dir: &Path,
        bundle: &HostBundle,
        tmp_root: &Path,
        output_path: &Path,
        overwrite: bool,
    ) -> HostOutcome {
        let scratch = match HostScratch::create(tmp_root, &bundle.hostname) {
            Ok(s) => s,
            Err(e) => {
                return HostOutcome {
                    hostname: bundle.hostname.clone(),
                    written_path: None,
                    instance_failures: 0,
                    skipped_files: 0,
                    result: Err(OrcError::Extraction(format!(
                        "allocating scratch dir for {}: {e}",
                        bundle.hostname
                    ))),
                };
            }
        };

        // `Config::from_yaml_str` already merges entries sharing one `name`
        // into a single `PluginSpec`, so this flat_map only produces one
        // descriptor per (name, archive, sub_archive) triple in practice.
        // The dedup below is a second line of defense against that triple
        // ever repeating (e.g. a future config source that skips the merge)
        // rather than load-bearing today.
        let mut seen = HashSet::new();
        let descriptors: Vec<_> = config
            .plugins
            .iter()
            .flat_map(|spec| {
                archive_index::instances_for(bundle, spec)
                    .into_iter()
                    .map(move |d| (spec, d))
            })
            .filter(|(spec, d)| seen.insert((spec.name.clone(), d.archive.clone(), d.sub_archive.clone())))
            .collect();

        log::info!(
            "host {}: running {} plugin instances",
            bundle.hostname,
            descriptors.len()
        );

        let outcomes: Vec<InstanceOutcome> = self.pool.install(|| {
            descriptors
                .par_iter()
                .map(|(spec, descriptor)| {
                    runtime::run_instance_catching(
                        config,
                        config_dir,
                        spec,
                        descriptor,
                        &bundle.hostname,
                        &scratch,
                        &self.cancel,
                    )
                })
                .collect()
        });

        let instance_failures = outcomes.iter().filter(|o| o.failed).count();
        let skipped_files: usize = outcomes.iter().map(|o| o.skipped_files).sum();
        let partials: Vec<PathBuf> = outcomes.into_iter().filter_map(|o| o.partial_path).collect();

        if self.cancel.is_cancelled() {
            log::warn!("host {}: cancelled before merge, scratch will be cleaned up", bundle.hostname);
            return HostOutcome {
                hostname: bundle.hostname.clone(),
                written_path: None,
                instance_failures,
                skipped_files,
                result: Ok(()),
            };
        }

        let merge_result = merge_host_timelines(&partials, output_path, overwrite, scratch.path());
        let written_path = if merge_result.is_ok() {
            Some(output_path.to_path_buf())
        } else {
            None
        };

        HostOutcome {
            hostname: bundle.hostname.clone(),
            written_path,
            instance_failures,
            skipped_files,
            result: merge_result,
        }
    }

    /// Runs `process_host` for every bundle through the same bounded pool.
    /// Nested `par_iter` calls all draw from `self.pool`, so this host-level
    /// fan-out and each host's own Phase 1 fan-out share one `J`-wide budget
    /// rather than multiplying it — a host's Phase 2 merge can start as soon
    /// as that host's Phase 1 instances finish, without waiting for other
    /// hosts.
    pub fn process_hosts(
        &self,
        config: &Config,
        config_dir: &Path,
        bundles: &[(HostBundle, PathBuf)],
        tmp_root: &Path,
        overwrite: bool,
    ) -> Vec<HostOutcome> {
        self.pool.install(|| {
            bundles
                .par_iter()
                .map(|(bundle, output_path)| {
                    self.process_host(config, config_dir, bundle, tmp_root, output_path, overwrite)
                })
                .collect()
        })
    }
}
