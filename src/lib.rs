//! heapxfer: benchmark of heap transfer strategies between a process and its
//! forked child
//!
//! The library half of the binary. Re-exports the core vocabulary and the
//! engine, plus the command-line layer so it can be tested without forking.

pub mod cli;

pub use heapxfer_core as core;
pub use heapxfer_engine as engine;

pub use cli::{config_origin, load_config, Cli};
pub use heapxfer_core::{prelude, MethodReport, RunSummary, TransferConfig, TransferError};
pub use heapxfer_engine::Orchestrator;
