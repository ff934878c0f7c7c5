//! Command-line interface for mediadeck
//!
//! Handles argument parsing and logging configuration.

use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

/// mediadeck - audio playback and camera capture console
#[derive(Parser, Debug)]
#[command(name = "mediadeck")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace, -vvvv = all deps
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Configuration file (defaults to <config dir>/mediadeck/config.json)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Audio file or http(s) URL to load at startup
    #[arg(short, long)]
    pub load: Option<String>,

    /// Start a camera at startup; pass a device id or "default"
    #[arg(long, num_args = 0..=1, default_missing_value = "default")]
    pub camera: Option<String>,
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    /// Device requested with `--camera`, `None` meaning the default camera
    pub fn startup_camera(&self) -> Option<Option<&str>> {
        self.camera
            .as_deref()
            .map(|id| (id != "default").then_some(id))
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    builder.filter_module("mediadeck", args.log_level());

    // HTTP client internals only at -vvvv
    if args.verbose >= 4 {
        builder.filter_module("reqwest", args.log_level());
        builder.filter_module("hyper", args.log_level());
        builder.filter_module("pipewire", args.log_level());
    }

    builder.format_timestamp_millis().init();
}
