use std::path::{Path, PathBuf};

use clap::Parser;

use orc2timeline::archive_index::HostBundle;
use orc2timeline::config::Config;
use orc2timeline::error::OrcError;
use orc2timeline::scheduler::{HostOutcome, Scheduler};
use orc2timeline::{cancel, config, host, scratch};

#[derive(Parser, Debug, Clone)]
struct GlobalOpts {
    /// Logging verbosity: DEBUG, INFO, WARNING, ERROR.
    #[arg(long, default_value = "INFO", global = true)]
    log_level: String,

    /// Scratch root; falls back to $TMPDIR, then the platform default.
    #[arg(long, global = true)]
    tmp_dir: Option<PathBuf>,

    /// Allow overwriting an existing output file.
    #[arg(long, default_value_t = false, global = true)]
    overwrite: bool,

    /// Worker count for both extraction/parsing and final merges.
    #[arg(short = 'j', long = "jobs", default_value_t = 1, global = true)]
    jobs: usize,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
enum Command {
    /// Process a single host's ORC archives into one timeline.
    Process {
        /// Outer 7z archives, all belonging to the same host.
        files: Vec<PathBuf>,
        /// Output path, must end in .csv.gz.
        output_path: PathBuf,
        #[command(flatten)]
        opts: GlobalOpts,
    },
    /// Recursively group *.7z by host and write one timeline per host.
    ProcessDir {
        input_dir: PathBuf,
        output_dir: PathBuf,
        #[command(flatten)]
        opts: GlobalOpts,
    },
    /// Print the absolute path of the effective config file.
    ShowConfFile {
        #[command(flatten)]
        opts: GlobalOpts,
    },
    /// Print the parsed config.
    ShowConf {
        #[command(flatten)]
        opts: GlobalOpts,
    },
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = match level.to_ascii_uppercase().as_str() {
        "DEBUG" => simplelog::LevelFilter::Debug,
        "INFO" => simplelog::LevelFilter::Info,
        "WARNING" => simplelog::LevelFilter::Warn,
        "ERROR" => simplelog::LevelFilter::Error,
        other => anyhow::bail!("unknown --log-level: {other}"),
    };
    simplelog::TermLogger::init(
        filter,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;
    Ok(())
}

fn load_config() -> Result<(Config, PathBuf), OrcError> {
    let path = config::effective_config_path();
    let config = Config::from_file(&path)?;
    Ok((config, path))
}

/// Worst-observed outcome across all hosts processed in one invocation: 0 if
/// every host succeeded cleanly, 1 if a host had instance failures or a merge
/// error, 2 for bad input / an existing output file, 3 for a config error.
fn exit_code_for(outcomes: &[HostOutcome]) -> i32 {
    let mut worst = 0;
    for outcome in outcomes {
        if let Err(e) = &outcome.result {
            worst = worst.max(e.exit_code());
        } else if outcome.instance_failures > 0 {
            worst = worst.max(1);
        }
    }
    worst
}

fn print_summary(outcomes: &[HostOutcome]) {
    for outcome in outcomes {
        match &outcome.result {
            Ok(()) => eprintln!(
                "{}: ok, {} instance failures, {} files skipped, wrote {}",
                outcome.hostname,
                outcome.instance_failures,
                outcome.skipped_files,
                outcome
                    .written_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<nothing>".to_string())
            ),
            Err(e) => eprintln!("{}: FAILED: {e}", outcome.hostname),
        }
    }
}

fn run_process(files: Vec<PathBuf>, output_path: PathBuf, opts: GlobalOpts) -> anyhow::Result<i32> {
    let looks_like_csv_gz = output_path.extension().and_then(|e| e.to_str()) == Some("gz")
        && output_path
            .file_stem()
            .and_then(|s| Path::new(s).extension())
            .map(|e| e == "csv")
            .unwrap_or(false);
    if !looks_like_csv_gz {
        eprintln!("OUTPUT_PATH must end in .csv.gz: {}", output_path.display());
        return Ok(2);
    }

    let (hostname, members) = match host::group_single_host(&files) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{e}");
            return Ok(e.exit_code());
        }
    };

    let (config, config_path) = match load_config() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{e}");
            return Ok(e.exit_code());
        }
    };
    let config_dir = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();

    let bundle = HostBundle::from_paths(hostname, members);
    let tmp_root = scratch::resolve_tmp_root(opts.tmp_dir.as_deref());

    let scheduler = Scheduler::new(opts.jobs);
    install_ctrlc(scheduler.cancellation_token());

    let outcomes = scheduler.process_hosts(
        &config,
        &config_dir,
        &[(bundle, output_path)],
        &tmp_root,
        opts.overwrite,
    );
    print_summary(&outcomes);
    Ok(exit_code_for(&outcomes))
}

fn run_process_dir(input_dir: PathBuf, output_dir: PathBuf, opts: GlobalOpts) -> anyhow::Result<i32> {
    let groups = match host::group_dir_by_host(&input_dir) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{e}");
            return Ok(e.exit_code());
        }
    };

    let (config, config_path) = match load_config() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{e}");
            return Ok(e.exit_code());
        }
    };
    let config_dir = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();

    std::fs::create_dir_all(&output_dir)?;
    let bundles: Vec<(HostBundle, PathBuf)> = groups
        .into_iter()
        .map(|(hostname, members)| {
            let output_path = output_dir.join(format!("{hostname}.csv.gz"));
            (HostBundle::from_paths(hostname, members), output_path)
        })
        .collect();

    let tmp_root = scratch::resolve_tmp_root(opts.tmp_dir.as_deref());
    let scheduler = Scheduler::new(opts.jobs);
    install_ctrlc(scheduler.cancellation_token());

    let outcomes = scheduler.process_hosts(&config, &config_dir, &bundles, &tmp_root, opts.overwrite);
    print_summary(&outcomes);
    Ok(exit_code_for(&outcomes))
}

fn install_ctrlc(token: cancel::CancellationToken) {
    let result = ctrlc::set_handler(move || {
        log::warn!("SIGINT received, cancelling cooperatively; current files will finish");
        token.cancel();
    });
    if let Err(e) = result {
        log::warn!("could not install SIGINT handler: {e}");
    }
}

fn main() -> anyhow::Result<()> {
    let command = Command::parse();

    let opts = match &command {
        Command::Process { opts, .. } => opts.clone(),
        Command::ProcessDir { opts, .. } => opts.clone(),
        Command::ShowConfFile { opts } => opts.clone(),
        Command::ShowConf { opts } => opts.clone(),
    };
    init_logging(&opts.log_level)?;

    let exit_code = match command {
        Command::Process {
            files,
            output_path,
            opts,
        } => run_process(files, output_path, opts)?,
        Command::ProcessDir {
            input_dir,
            output_dir,
            opts,
        } => run_process_dir(input_dir, output_dir, opts)?,
        Command::ShowConfFile { .. } => {
            println!("{}", config::effective_config_path().display());
            0
        }
        Command::ShowConf { .. } => match load_config() {
            Ok((config, _)) => {
                for spec in &config.plugins {
                    println!(
                        "{}: archives={:?} sub_archives={:?} source_type={} pattern={}",
                        spec.name,
                        spec.archives,
                        spec.sub_archives,
                        spec.source_type,
                        spec.match_pattern.as_str()
                    );
                }
                println!("chunk_size: {}", config.chunk_size);
                0
            }
            Err(e) => {
                eprintln!("{e}");
                e.exit_code()
            }
        },
    };

    std::process::exit(exit_code);
}
