//! Command-line layer: flags, config file merge and log level resolution

use anyhow::{Context, Result};
use clap::Parser;
use heapxfer_core::{Method, TransferConfig};
use std::path::PathBuf;

/// Benchmark heap transfer strategies between a parent and its forked child
#[derive(Parser, Debug, PartialEq)]
#[clap(name = "heapxfer", author, version, about, long_about = None)]
pub struct Cli {
    /// Perform N asynchronous writes (default 4)
    #[clap(short = 'a', long, value_name = "N")]
    pub asyncios: Option<usize>,

    /// Set heap size to N megabytes (default 128)
    #[clap(short = 's', long = "size", value_name = "MB")]
    pub size_mb: Option<u64>,

    /// Just run method M once; M in [0..7]
    #[clap(
        short = 'm',
        long,
        value_name = "M",
        value_parser = clap::value_parser!(u8).range(0..8)
    )]
    pub method: Option<u8>,

    /// Configuration file (TOML)
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Scratch backing file location
    #[clap(long, value_name = "PATH")]
    pub scratch: Option<PathBuf>,

    /// Bounded AIO wait between polls, in milliseconds
    #[clap(long, value_name = "N")]
    pub aio_timeout_ms: Option<u64>,

    /// Log a failed child instead of aborting the run
    #[clap(long)]
    pub lenient: bool,

    /// Print the run summary as JSON on stdout
    #[clap(long)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[clap(short, long)]
    pub log_level: Option<String>,

    /// Enable debug logging (same as --log-level=debug)
    #[clap(short, long)]
    pub verbose: bool,
}

/// Build the run configuration: file first (or defaults), then flags on top
pub fn load_config(cli: &Cli) -> Result<TransferConfig> {
    let mut config = match &cli.config {
        Some(path) => TransferConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TransferConfig::default(),
    };

    if let Some(megabytes) = cli.size_mb {
        config = config.with_heap_mb(megabytes)?;
    }
    if let Some(asyncios) = cli.asyncios {
        config = config.with_asyncios(asyncios);
    }
    if let Some(index) = cli.method {
        config = config.with_method(Some(Method::from_index(index as usize)?));
    }
    if let Some(scratch) = &cli.scratch {
        config = config.with_scratch_path(scratch);
    }
    if let Some(timeout) = cli.aio_timeout_ms {
        config.aio_timeout_ms = timeout;
    }
    if cli.lenient {
        config.strict_child_status = false;
    }

    if cli.verbose {
        config.log_level = "debug".to_string();
    } else if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }

    Ok(config)
}

/// Where the base configuration came from, logged once the subscriber is up
pub fn config_origin(cli: &Cli) -> String {
    match &cli.config {
        Some(path) => format!("loaded configuration from {}", path.display()),
        None => "using built-in configuration defaults".to_string(),
    }
}
