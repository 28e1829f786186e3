//! ashred CLI
//!
//! Overwrite a file or raw block device with random data.

mod config;
mod progress;

use anyhow::Context;
use ashred_core::{RandomSourceSpec, ShredError, ShredReport, shred_path};
use clap::Parser;
use console::style;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use config::{Config, Overrides, parse_size};
use progress::{ShredProgress, format_bytes, format_speed, summary_line};

/// ashred - overwrite a file or device with random data using overlapped I/O
#[derive(Parser)]
#[command(name = "ashred")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// File or raw device to shred
    target: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of buffer slots (bound on concurrent writes)
    #[arg(long)]
    slots: Option<usize>,

    /// Size of each slot buffer, e.g. 131072, 128K or 1M
    #[arg(long, value_parser = parse_size)]
    buffer_size: Option<usize>,

    /// Random source: a device path, or "os" for the OS CSPRNG
    #[arg(long)]
    random_source: Option<RandomSourceSpec>,

    /// Show a progress bar on stderr
    #[arg(long)]
    progress: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {err:#}", style("error:").red().bold());
            return ExitCode::FAILURE;
        }
    };

    if cli.print_config {
        return match toml::to_string_pretty(&config) {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{} {err}", style("error:").red().bold());
                ExitCode::FAILURE
            }
        };
    }

    init_logging(cli.verbose, &config);

    match shred(&cli.target, &config, cli.progress) {
        Ok(report) => {
            println!("{}", summary_line(&report));
            ExitCode::SUCCESS
        }
        Err(err) => {
            let code = exit_code(&err);
            eprintln!(
                "{} failed with error {code}: {err}. Exiting.",
                cli.target.display()
            );
            ExitCode::from(code)
        }
    }
}

/// Merge the optional config file with command-line overrides
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    config.apply(Overrides {
        slots: cli.slots,
        buffer_size: cli.buffer_size,
        random_source: cli.random_source.clone(),
    });

    config.validate()?;
    Ok(config)
}

/// Initialize logging on stderr; stdout carries only the summary line
fn init_logging(verbose: bool, config: &Config) {
    let default_level = if verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Shred the target, driving the progress bar
fn shred(target: &Path, config: &Config, show_progress: bool) -> Result<ShredReport, ShredError> {
    let progress = ShredProgress::new(&target.display().to_string(), show_progress);

    let result = shred_path(target, &config.shred, |snapshot| progress.update(snapshot));

    match &result {
        Ok(report) => {
            progress.finish();
            tracing::info!(
                "{} written at {}",
                format_bytes(report.bytes_written()),
                format_speed(report.throughput())
            );
        }
        Err(err) => {
            progress.abandon();
            tracing::error!(%err, "shred failed");
        }
    }

    result
}

/// Exit status for a failed run: the system error code when there is one
fn exit_code(err: &ShredError) -> u8 {
    err.raw_os_error()
        .and_then(|code| u8::try_from(code).ok())
        .filter(|&code| code != 0)
        .unwrap_or(1)
}
