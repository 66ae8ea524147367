//! Method 2: overlapped chunk writes completed through callbacks
//!
//! Chunks are queued to a bounded pool of completion workers. Each worker
//! claims the next chunk, performs a positional write on an independent
//! handle and then runs the completion callback. The issuing thread only
//! polls the tracker.

use super::{map_backing, ChildContext, ParentContext, TransferStrategy};
use crate::platform::expect_len;
use crate::region::{HeapBuffer, ReceivedHeap};
use crate::tracker::CallbackTracker;
use heapxfer_core::{Method, Result, TransferError, TransferOutcome};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Upper bound on concurrently running completion workers
const MAX_WORKERS: usize = 64;

pub struct OverlappedWriteStrategy;

impl TransferStrategy for OverlappedWriteStrategy {
    fn method(&self) -> Method {
        Method::OverlappedWrite
    }

    fn transfer(
        &self,
        heap: &mut HeapBuffer,
        ctx: &mut ParentContext<'_>,
    ) -> Result<TransferOutcome> {
        let plan = ctx.plan;
        let poll_interval = ctx.config.poll_interval();
        let file = ctx.create_backing(0)?.reopen()?;
        let source = heap.as_slice()?;
        let tracker = CallbackTracker::new(&plan);

        write_chunks(&file, source, &tracker, poll_interval, |index| {
            thread::Builder::new().name(format!("overlapped-{}", index))
        })?;

        let written = tracker.total_bytes();
        info!("overlapped write {} times wrote {} bytes", plan.count(), written);
        expect_len("overlapped write", written as usize, source.len())?;

        Ok(TransferOutcome {
            operations: tracker.records(),
            ..TransferOutcome::with_bytes(written)
        })
    }

    fn receive(&self, ctx: &mut ChildContext<'_>) -> Result<ReceivedHeap> {
        map_backing(ctx)
    }
}

/// Chunk indices handed out to workers in offset order
struct ChunkQueue {
    next: AtomicUsize,
    count: usize,
}

impl ChunkQueue {
    fn new(count: usize) -> Self {
        Self {
            next: AtomicUsize::new(0),
            count,
        }
    }

    fn claim(&self) -> Option<usize> {
        let index = self.next.fetch_add(1, Ordering::AcqRel);
        (index < self.count).then_some(index)
    }

    /// Fail every chunk nobody claimed yet, so the tracker still settles
    fn cancel_rest(&self, tracker: &CallbackTracker) -> usize {
        let mut cancelled = 0;
        while let Some(index) = self.claim() {
            tracker.complete(index, Err(std::io::Error::from_raw_os_error(libc::ECANCELED)));
            cancelled += 1;
        }
        cancelled
    }
}

/// Write every chunk of `source` through a worker pool and wait for completion
///
/// A worker that cannot be started fails the transfer; chunks not yet
/// claimed are completed with `ECANCELED` before returning.
fn write_chunks<B>(
    file: &File,
    source: &[u8],
    tracker: &CallbackTracker,
    poll_interval: Duration,
    mut builder: B,
) -> Result<()>
where
    B: FnMut(usize) -> thread::Builder,
{
    let queue = ChunkQueue::new(tracker.len());
    let workers = tracker.len().min(MAX_WORKERS);

    thread::scope(|scope| {
        for worker in 0..workers {
            let queue = &queue;
            let spawned = builder(worker).spawn_scoped(scope, move || {
                while let Some(index) = queue.claim() {
                    let chunk = tracker.chunk(index);
                    let bytes = &source[chunk.offset..chunk.offset + chunk.len];
                    let result = file
                        .write_all_at(bytes, chunk.offset as u64)
                        .map(|()| bytes.len());
                    tracker.complete(index, result);
                }
            });
            if let Err(e) = spawned {
                let cancelled = queue.cancel_rest(tracker);
                debug!("worker {} not started, {} chunks cancelled", worker, cancelled);
                return Err(TransferError::os("spawn", e));
            }
        }
        tracker.wait(poll_interval)
    })
}
