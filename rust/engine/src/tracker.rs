//! Completion trackers for the asynchronous strategies
//!
//! [`CallbackTracker`] accounts for overlapped writes whose completion
//! callbacks run on worker threads. [`SignalTracker`] counts the completion
//! signals delivered for POSIX AIO writes.

use crate::platform::os_error;
use heapxfer_core::{Chunk, ChunkPlan, CompletionRecord, OperationState, Result, TransferError};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Raw status word of an operation still in flight
pub const STATUS_PENDING: i32 = -1;

struct OperationSlot {
    chunk: Chunk,
    /// `STATUS_PENDING`, 0 on success, errno otherwise
    status: AtomicI32,
    bytes: AtomicU64,
}

/// Per-operation slots plus shared outstanding/total counters
pub struct CallbackTracker {
    slots: Box<[OperationSlot]>,
    outstanding: AtomicUsize,
    total_bytes: AtomicU64,
}

impl CallbackTracker {
    /// One pending slot per chunk of `plan`
    pub fn new(plan: &ChunkPlan) -> Self {
        let slots: Box<[OperationSlot]> = plan
            .chunks()
            .map(|chunk| OperationSlot {
                chunk,
                status: AtomicI32::new(STATUS_PENDING),
                bytes: AtomicU64::new(0),
            })
            .collect();
        Self {
            outstanding: AtomicUsize::new(slots.len()),
            slots,
            total_bytes: AtomicU64::new(0),
        }
    }

    /// Number of tracked operations
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn chunk(&self, index: usize) -> Chunk {
        self.slots[index].chunk
    }

    /// Completion callback for operation `index`
    ///
    /// Must be invoked exactly once per operation.
    pub fn complete(&self, index: usize, result: std::io::Result<usize>) {
        let slot = &self.slots[index];
        let (status, len) = match result {
            Ok(len) => (0, len as u64),
            Err(e) => (e.raw_os_error().unwrap_or(libc::EIO), 0),
        };
        debug!("finisher {} error {}", index, status);
        slot.bytes.store(len, Ordering::Relaxed);
        slot.status.store(status, Ordering::Release);
        self.total_bytes.fetch_add(len, Ordering::AcqRel);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Acquire)
    }

    /// First operation whose status word holds an error
    pub fn failed(&self) -> Option<(usize, i32)> {
        self.slots.iter().enumerate().find_map(|(i, slot)| {
            match slot.status.load(Ordering::Acquire) {
                STATUS_PENDING | 0 => None,
                code => Some((i, code)),
            }
        })
    }

    /// Poll until every operation completed, failing on the first error seen
    pub fn wait(&self, poll_interval: Duration) -> Result<()> {
        loop {
            if let Some((index, code)) = self.failed() {
                debug!("overlapped #{} error {}", index, code);
                return Err(TransferError::os(
                    "overlapped write",
                    std::io::Error::from_raw_os_error(code),
                ));
            }
            if self.outstanding() == 0 {
                return Ok(());
            }
            std::thread::sleep(poll_interval);
        }
    }

    pub fn records(&self) -> Vec<CompletionRecord> {
        self.slots
            .iter()
            .map(|slot| {
                let status = slot.status.load(Ordering::Acquire);
                CompletionRecord {
                    state: if status == STATUS_PENDING {
                        OperationState::Issued
                    } else {
                        OperationState::Done
                    },
                    bytes: slot.bytes.load(Ordering::Relaxed),
                    error: status.max(0),
                    ..CompletionRecord::issued(slot.chunk)
                }
            })
            .collect()
    }
}

/// Completion notifications counted since the last install
static COMPLETION_SIGNALS: AtomicU64 = AtomicU64::new(0);

extern "C" fn on_completion(
    _signo: libc::c_int,
    _info: *mut libc::siginfo_t,
    _context: *mut libc::c_void,
) {
    COMPLETION_SIGNALS.fetch_add(1, Ordering::Relaxed);
}

/// Installed completion-signal handler; the previous one returns on drop
pub struct SignalTracker {
    signal: Signal,
    previous: SigAction,
}

impl SignalTracker {
    /// Reset the counter and start counting `signal`
    pub fn install(signal: Signal) -> Result<Self> {
        COMPLETION_SIGNALS.store(0, Ordering::SeqCst);

        let mut mask = SigSet::empty();
        mask.add(signal);
        let action = SigAction::new(
            SigHandler::SigAction(on_completion),
            SaFlags::SA_SIGINFO | SaFlags::SA_RESTART,
            mask,
        );
        let previous = unsafe { sigaction(signal, &action) }.map_err(os_error("sigaction"))?;

        Ok(Self { signal, previous })
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }

    pub fn signals_received(&self) -> u64 {
        COMPLETION_SIGNALS.load(Ordering::SeqCst)
    }
}

impl Drop for SignalTracker {
    fn drop(&mut self) {
        // a completion signal can trail the last status update; with the
        // default disposition it would terminate the process
        let restored = match self.previous.handler() {
            SigHandler::SigDfl => {
                SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty())
            }
            _ => self.previous,
        };
        let _ = unsafe { sigaction(self.signal, &restored) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_out_of_order_completion() {
        let plan = ChunkPlan::new(4096, 4).unwrap();
        let tracker = Arc::new(CallbackTracker::new(&plan));
        assert_eq!(tracker.outstanding(), 4);

        let workers: Vec<_> = [3usize, 1, 0, 2]
            .into_iter()
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || tracker.complete(i, Ok(tracker.chunk(i).len)))
            })
            .collect();

        tracker.wait(Duration::from_millis(1)).unwrap();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(tracker.outstanding(), 0);
        assert_eq!(tracker.total_bytes(), 4096);
        let records = tracker.records();
        assert_eq!(heapxfer_core::settled_total(&records), Some(4096));
        assert_eq!(
            records.iter().map(|r| r.offset).collect::<Vec<_>>(),
            vec![0, 1024, 2048, 3072]
        );
    }

    #[test]
    fn test_error_status_fails_wait() {
        let plan = ChunkPlan::new(4096, 2).unwrap();
        let tracker = CallbackTracker::new(&plan);
        tracker.complete(1, Err(std::io::Error::from_raw_os_error(libc::ENOSPC)));

        assert_eq!(tracker.failed(), Some((1, libc::ENOSPC)));
        assert!(tracker.wait(Duration::from_millis(1)).is_err());
        assert_eq!(tracker.records()[0].state, OperationState::Issued);
    }

    #[test]
    fn test_signal_counter() {
        let tracker = SignalTracker::install(Signal::SIGUSR2).unwrap();
        assert_eq!(tracker.signals_received(), 0);

        nix::sys::signal::raise(Signal::SIGUSR2).unwrap();
        nix::sys::signal::raise(Signal::SIGUSR2).unwrap();
        assert_eq!(tracker.signals_received(), 2);
    }
}
