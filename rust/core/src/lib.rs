//! Heap Transfer Benchmark - Core Module
//!
//! This crate provides the shared vocabulary of the heap transfer benchmark:
//! the checksum used to verify transfers, the run configuration, the catalogue
//! of transfer methods, the heap fill pattern and the reports produced by a run.

pub mod checksum;
pub mod completion;
pub mod config;
pub mod error;
pub mod heap;
pub mod method;
pub mod metrics;

pub use checksum::*;
pub use completion::*;
pub use config::*;
pub use error::*;
pub use heap::*;
pub use method::*;
pub use metrics::*;

/// Re-export common types
pub mod prelude {
    pub use crate::{
        checksum::checksum,
        config::TransferConfig,
        error::{Result, TransferError},
        heap::{ChunkPlan, HeapPattern},
        method::{Executor, Method},
        metrics::{MethodReport, RunSummary},
    };
}

/// Current version of the benchmark
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Marker byte written at the first and last heap positions
pub const SENTINEL: u8 = b'+';

/// One mebibyte
pub const MIB: usize = 1024 * 1024;

/// Default heap size (128MB)
pub const DEFAULT_HEAP_SIZE: usize = 128 * MIB;

/// Default asynchronous I/O fan-out
pub const DEFAULT_ASYNCIOS: usize = 4;

/// Largest heap accepted, a signed 32-bit byte count
pub const MAX_HEAP_SIZE: usize = i32::MAX as usize;

/// Default location of the scratch backing file
pub const DEFAULT_SCRATCH_PATH: &str = "/tmp/heapfile";
