//! Timing and per-method reports

use crate::{CompletionRecord, Method};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// Run origin shared by parent and child
///
/// Taken before fork; `Instant` is monotonic system-wide so both processes
/// measure milestones against the same origin.
#[derive(Debug, Clone, Copy)]
pub struct PhaseClock {
    origin: Instant,
}

impl PhaseClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Performance measurement utility
pub struct PerformanceMeasurement {
    start_time: Instant,
    operation_name: &'static str,
}

impl PerformanceMeasurement {
    /// Start a new performance measurement
    pub fn start(operation_name: &'static str) -> Self {
        Self {
            start_time: Instant::now(),
            operation_name,
        }
    }

    /// Finish the measurement and return the elapsed time
    pub fn finish(self) -> (&'static str, Duration) {
        (self.operation_name, self.start_time.elapsed())
    }
}

/// What the parent side of a strategy did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// Bytes the parent moved; zero when the child does the work
    pub bytes_transferred: u64,
    /// Per-operation records of asynchronous strategies
    pub operations: Vec<CompletionRecord>,
    /// Completion notifications counted by a signal handler
    pub signals_received: Option<u64>,
    /// Operations the issuing loop saw finish, counted independently of signals
    pub finished: Option<usize>,
    /// Time spent waiting on the peer inside the strategy, excluded from work time
    pub handshake_wait_micros: u64,
    /// Time of the bulk copy step, when the strategy has one
    pub copy_micros: Option<u64>,
}

impl TransferOutcome {
    pub fn with_bytes(bytes: u64) -> Self {
        Self {
            bytes_transferred: bytes,
            ..Default::default()
        }
    }

    pub fn handshake_wait(&self) -> Duration {
        Duration::from_micros(self.handshake_wait_micros)
    }
}

/// What the child reports back after terminal validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildReport {
    /// Checksum of the received heap, absent when nothing was transferred
    pub checksum: Option<u32>,
    pub received_bytes: u64,
    /// Address of the child's view of the heap
    pub address: u64,
    pub work_micros: u64,
    pub handshake_wait_micros: u64,
}

/// How the child process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildExit {
    Exited(i32),
    Signaled(String),
}

impl ChildExit {
    pub fn success(&self) -> bool {
        matches!(self, ChildExit::Exited(0))
    }
}

/// Result of running one method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodReport {
    pub method: Method,
    pub heap_size: u64,
    pub asyncios: usize,
    pub heap_address: u64,
    pub parent_checksum: u32,
    pub parent_work_micros: u64,
    pub transfer: TransferOutcome,
    pub child: Option<ChildReport>,
    pub child_exit: ChildExit,
}

impl MethodReport {
    pub fn parent_work(&self) -> Duration {
        Duration::from_micros(self.parent_work_micros)
    }

    pub fn child_work(&self) -> Option<Duration> {
        self.child
            .as_ref()
            .map(|c| Duration::from_micros(c.work_micros))
    }

    /// Combined parent and child work time
    pub fn total_work(&self) -> Duration {
        self.parent_work() + self.child_work().unwrap_or_default()
    }

    /// Child exited cleanly and, if bytes moved, agreed on the checksum
    pub fn succeeded(&self) -> bool {
        if !self.child_exit.success() {
            return false;
        }
        match &self.child {
            Some(child) if self.method.transfers_bytes() => {
                child.checksum == Some(self.parent_checksum)
                    && child.received_bytes == self.heap_size
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Heap size over total work time
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.total_work().as_secs_f64();
        if secs == 0.0 || !self.method.transfers_bytes() {
            return 0.0;
        }
        (self.heap_size as f64 / (1024.0 * 1024.0)) / secs
    }
}

/// Reports of a whole run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub reports: Vec<MethodReport>,
}

impl RunSummary {
    pub fn push(&mut self, report: MethodReport) {
        self.reports.push(report);
    }

    pub fn all_succeeded(&self) -> bool {
        self.reports.iter().all(MethodReport::succeeded)
    }

    /// Fastest method that transferred bytes successfully
    pub fn fastest(&self) -> Option<&MethodReport> {
        self.reports
            .iter()
            .filter(|r| r.method.transfers_bytes() && r.succeeded())
            .min_by_key(|r| r.total_work())
    }

    /// Export the summary to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable table
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<3} {:<44} {:<7} {:>10} {:>10} {:>10} {:>10}  {}",
            "#", "method", "by", "parent ms", "child ms", "total ms", "MB/s", "status"
        );
        for report in &self.reports {
            let child_ms = report
                .child_work()
                .map(|d| format!("{:.1}", d.as_secs_f64() * 1000.0))
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "{:<3} {:<44} {:<7} {:>10.1} {:>10} {:>10.1} {:>10.1}  {}",
                report.method.index(),
                report.method.name(),
                report.method.executor(),
                report.parent_work().as_secs_f64() * 1000.0,
                child_ms,
                report.total_work().as_secs_f64() * 1000.0,
                report.throughput_mbps(),
                if report.succeeded() { "ok" } else { "FAILED" },
            );
        }
        out
    }
}
