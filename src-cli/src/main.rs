//! PlotCam operator console
//!
//! Starts the capture worker, shows the live stream, gates captures on the
//! level sensor and records each capture in the experiment's metadata.

mod accelerometer;
mod colors;
mod commands;
mod config;
mod controller;
mod display;
mod exit_codes;
mod experiment;
mod level;
mod metadata;
mod session;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use config::{parse_resolution, AccelerometerKind, AppConfig, ConfigError, ConfigOverrides};
use exit_codes::ExitCode;
use plotcam_common::logging;
use plotcam_common::SourceKind;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// PlotCam - plot imaging console
#[derive(Parser, Debug)]
#[command(name = "plotcam")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Show log output on the terminal (otherwise warnings only)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Side-by-side layout for the VR viewer
    #[arg(long, global = true)]
    vr: bool,

    /// Camera stream resolution, WIDTHxHEIGHT
    #[arg(long, global = true, value_parser = parse_resolution)]
    resolution: Option<(u32, u32)>,

    /// Camera frame rate
    #[arg(long, global = true)]
    fps: Option<u32>,

    /// Directory holding the experiments
    #[arg(long, global = true)]
    experiments_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new experiment
    New {
        /// Experiment name
        name: String,
    },
    /// List experiments
    List,
    /// Show an experiment's captures and next plot number
    Info {
        /// Experiment name
        name: String,
    },
    /// Start the camera and take pictures
    Run(RunArgs),
    /// Show version information
    Version,
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// Experiment to open at start
    #[arg(short, long)]
    experiment: Option<String>,

    /// Plot number of the first picture (default: continue the experiment)
    #[arg(short, long)]
    plot_number: Option<u32>,

    /// Frame source: synthetic, absent
    #[arg(long, value_parser = parse_source)]
    source: Option<SourceKind>,

    /// Level sensor: simulated, none
    #[arg(long, value_parser = parse_accelerometer)]
    accelerometer: Option<AccelerometerKind>,
}

fn parse_source(s: &str) -> Result<SourceKind, String> {
    SourceKind::parse(s).ok_or_else(|| format!("unknown source '{}'", s))
}

fn parse_accelerometer(s: &str) -> Result<AccelerometerKind, String> {
    AccelerometerKind::parse(s).ok_or_else(|| format!("unknown accelerometer '{}'", s))
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let run = match &self.command {
            Commands::Run(args) => args.clone(),
            _ => RunArgs::default(),
        };
        ConfigOverrides {
            resolution: self.resolution,
            fps: self.fps,
            vr: self.vr,
            experiments_dir: self.experiments_dir.clone(),
            source: run.source,
            accelerometer: run.accelerometer,
        }
    }

    fn load_config(&self) -> Result<AppConfig, ConfigError> {
        let path = self.config.clone().unwrap_or_else(logging::config_path);
        let config = AppConfig::load(&path)?.with_overrides(&self.overrides());
        config.validate()?;
        Ok(config)
    }

    fn output(&self) -> commands::Output {
        commands::Output {
            json: self.json,
            quiet: self.quiet,
        }
    }

    /// Level handed to the worker, whose logs land on our stderr.
    fn worker_log_level(&self) -> &str {
        if self.verbose {
            &self.log_level
        } else {
            "warn"
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Log to a daily file in the log directory, and to stderr.
///
/// The returned guard flushes the file writer on drop.
fn init_logging(level: &str, verbose: bool) -> Option<WorkerGuard> {
    let stderr_filter = if verbose {
        env_filter(level)
    } else {
        EnvFilter::new("warn")
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);

    let (file_layer, guard) = match logging::ensure_log_dir() {
        Ok(()) => {
            let appender =
                tracing_appender::rolling::daily(logging::log_dir(), logging::CONSOLE_LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter(level));
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!(
                "{}",
                colors::warning(&format!(
                    "Cannot create log directory {}: {}",
                    logging::log_dir().display(),
                    e
                ))
            );
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

fn main() {
    let cli = Cli::parse();
    let guard = init_logging(&cli.log_level, cli.verbose);

    let exit_code = match cli.load_config() {
        Ok(config) => run_cli(cli, Arc::new(config)),
        Err(e) => {
            if !cli.quiet {
                eprintln!("{}", colors::error(&e.to_string()));
            }
            ExitCode::from(&e)
        }
    };

    // process::exit skips destructors; flush the log file first.
    drop(guard);
    std::process::exit(exit_code.as_i32());
}

fn run_cli(cli: Cli, config: Arc<AppConfig>) -> ExitCode {
    // Build the async runtime
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", colors::error(&format!("Failed to create Tokio runtime: {}", e)));
            return ExitCode::GeneralError;
        }
    };

    let exit_code = runtime.block_on(run(cli, config));
    // Stdin is read on a blocking thread that may never return.
    runtime.shutdown_timeout(Duration::from_millis(500));
    exit_code
}

async fn run(cli: Cli, config: Arc<AppConfig>) -> ExitCode {
    let out = cli.output();
    match &cli.command {
        Commands::New { name } => commands::new_experiment(&config, name, out),
        Commands::List => commands::list(&config, out),
        Commands::Info { name } => commands::info(&config, name, out),
        Commands::Run(args) => {
            let options = commands::RunOptions {
                experiment: args.experiment.clone(),
                plot_number: args.plot_number,
            };
            commands::run(config, options, cli.worker_log_level(), out).await
        }
        Commands::Version => {
            commands::version(cli.json);
            ExitCode::Success
        }
    }
}
