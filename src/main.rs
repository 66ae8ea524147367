//! heapxfer - heap transfer benchmark
//!
//! Runs the selected transfer methods, prints a summary table on stderr and
//! optionally the summary as JSON on stdout. Exits 0 only if every method
//! succeeded.

use anyhow::Result;
use clap::Parser;
use heapxfer::{config_origin, load_config, Cli, Orchestrator, TransferConfig, TransferError};
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("heapxfer: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_writer(std::io::stderr)
        .init();
    info!("{}", config_origin(&cli));

    match run(config, cli.json) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            match e.downcast_ref::<TransferError>() {
                Some(cause) => error!(category = ?cause.category(), "{:#}", e),
                None => error!("{:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(config: TransferConfig, json: bool) -> Result<bool> {
    let orchestrator = Orchestrator::new(config)?;
    let summary = orchestrator.run()?;

    eprint!("\n{}", summary.render_table());
    if let Some(fastest) = summary.fastest() {
        info!("fastest: {} ({:.1} MB/s)", fastest.method, fastest.throughput_mbps());
    }
    if json {
        println!("{}", summary.to_json()?);
    }

    Ok(summary.all_succeeded())
}
