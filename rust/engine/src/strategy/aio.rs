//! Method 6: POSIX AIO writes with signal notification
//!
//! Every chunk is one `aio_write` whose completion raises `SIGIO`. The
//! issuing loop blocks in `aio_suspend` with a timeout, then probes each
//! operation with `aio_error`: "would block" is reissued, "in progress"
//! keeps waiting, anything else is finished. Byte counts come from
//! `aio_return` once nothing is in flight.

use super::{map_backing, ChildContext, ParentContext, TransferStrategy};
use crate::platform::expect_len;
use crate::region::{HeapBuffer, ReceivedHeap};
use crate::tracker::SignalTracker;
use heapxfer_core::{
    ChunkPlan, CompletionRecord, Method, OperationState, Result, TransferError, TransferOutcome,
};
use nix::sys::signal::Signal;
use std::marker::PhantomData;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct AioWriteStrategy;

impl TransferStrategy for AioWriteStrategy {
    fn method(&self) -> Method {
        Method::AioWrite
    }

    fn transfer(
        &self,
        heap: &mut HeapBuffer,
        ctx: &mut ParentContext<'_>,
    ) -> Result<TransferOutcome> {
        let plan = ctx.plan;
        let timeout = ctx.config.aio_timeout();
        let poll_interval = ctx.config.poll_interval();
        let fd = ctx.create_backing(0)?.file()?.as_raw_fd();
        let source = heap.as_slice()?;

        let signals = SignalTracker::install(Signal::SIGIO)?;
        let mut batch = AioBatch::new(fd, source, &plan, signals.signal());
        batch.submit_all()?;
        batch.wait_all(timeout, poll_interval)?;
        let records = batch.collect()?;
        let finished = batch.finished();
        drop(batch);

        let written: u64 = records.iter().map(|r| r.bytes).sum();
        let signals_received = signals.signals_received();
        info!("aio write {} times wrote {} bytes", plan.count(), written);
        info!(
            "{} operations finished, {} completion signals received",
            finished, signals_received
        );
        expect_len("aio_write", written as usize, source.len())?;

        Ok(TransferOutcome {
            operations: records,
            signals_received: Some(signals_received),
            finished: Some(finished),
            ..TransferOutcome::with_bytes(written)
        })
    }

    fn receive(&self, ctx: &mut ChildContext<'_>) -> Result<ReceivedHeap> {
        map_backing(ctx)
    }
}

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

/// Control blocks of one transfer, borrowing the heap they write from
///
/// The blocks live in a boxed slice so their addresses stay fixed while the
/// kernel holds them. Dropping the batch cancels and drains anything still
/// in flight.
struct AioBatch<'heap> {
    fd: RawFd,
    blocks: Box<[libc::aiocb]>,
    records: Vec<CompletionRecord>,
    _heap: PhantomData<&'heap [u8]>,
}

impl<'heap> AioBatch<'heap> {
    fn new(fd: RawFd, heap: &'heap [u8], plan: &ChunkPlan, signal: Signal) -> Self {
        let blocks: Box<[libc::aiocb]> = plan
            .chunks()
            .map(|chunk| {
                let mut block: libc::aiocb = unsafe { std::mem::zeroed() };
                block.aio_fildes = fd;
                block.aio_buf = heap[chunk.offset..].as_ptr() as *mut libc::c_void;
                block.aio_nbytes = chunk.len;
                block.aio_offset = chunk.offset as libc::off_t;
                block.aio_sigevent.sigev_notify = libc::SIGEV_SIGNAL;
                block.aio_sigevent.sigev_signo = signal as libc::c_int;
                block
            })
            .collect();
        let records = plan
            .chunks()
            .map(|chunk| CompletionRecord {
                state: OperationState::Pending,
                submissions: 0,
                ..CompletionRecord::issued(chunk)
            })
            .collect();

        Self {
            fd,
            blocks,
            records,
            _heap: PhantomData,
        }
    }

    /// Hand operation `index` to the kernel; a refusal with EAGAIN leaves it pending
    fn submit(&mut self, index: usize) -> Result<()> {
        let block = &mut self.blocks[index];
        block.aio_sigevent.sigev_value = libc::sigval {
            sival_ptr: block as *mut libc::aiocb as *mut libc::c_void,
        };
        let rc = unsafe { libc::aio_write(block) };
        let code = if rc == -1 { errno() } else { 0 };
        record_submission(&mut self.records[index], submission_outcome(index, rc, code))
    }

    fn submit_all(&mut self) -> Result<()> {
        (0..self.blocks.len()).try_for_each(|i| self.submit(i))
    }

    fn in_flight(&self) -> impl Iterator<Item = usize> + '_ {
        self.records
            .iter()
            .filter(|r| r.state == OperationState::Issued)
            .map(|r| r.index)
    }

    fn finished(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state == OperationState::Done)
            .count()
    }

    /// Block in `aio_suspend` until at least one issued operation completes
    ///
    /// A timeout or a signal interruption only means "poll again".
    fn suspend(&self, timeout: Duration) -> Result<()> {
        let list: Vec<*const libc::aiocb> = self
            .records
            .iter()
            .zip(self.blocks.iter())
            .map(|(record, block)| match record.state {
                OperationState::Issued => block as *const libc::aiocb,
                _ => std::ptr::null(),
            })
            .collect();
        let ts = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as libc::c_long,
        };

        if unsafe { libc::aio_suspend(list.as_ptr(), list.len() as libc::c_int, &ts) } == -1 {
            let code = errno();
            if code != libc::EAGAIN && code != libc::EINTR {
                return Err(TransferError::os(
                    "aio_suspend",
                    std::io::Error::from_raw_os_error(code),
                ));
            }
            debug!("aio_suspend returned {}, polling again", code);
        }
        Ok(())
    }

    /// Wait until every operation has finished, reissuing refused ones
    fn wait_all(&mut self, timeout: Duration, poll_interval: Duration) -> Result<()> {
        let count = self.blocks.len();
        loop {
            let pending: Vec<usize> = self
                .records
                .iter()
                .filter(|r| r.state == OperationState::Pending)
                .map(|r| r.index)
                .collect();
            for index in pending {
                self.submit(index)?;
            }

            if self.finished() == count {
                return Ok(());
            }

            if self.in_flight().next().is_some() {
                self.suspend(timeout)?;
            } else {
                std::thread::sleep(poll_interval);
            }

            let issued: Vec<usize> = self.in_flight().collect();
            for index in issued {
                let status = unsafe { libc::aio_error(&self.blocks[index]) };
                settle(&mut self.records[index], status);
            }
        }
    }

    /// Reap final byte counts; any failed operation fails the transfer
    fn collect(&mut self) -> Result<Vec<CompletionRecord>> {
        let mut failure = None;
        for (record, block) in self.records.iter_mut().zip(self.blocks.iter_mut()) {
            let returned = unsafe { libc::aio_return(block) };
            if returned >= 0 {
                record.bytes = returned as u64;
            } else {
                warn!("aio_return #{} error {}", record.index, record.error);
            }
            if record.error != 0 && failure.is_none() {
                failure = Some(record.error);
            }
        }
        if let Some(code) = failure {
            return Err(TransferError::os(
                "aio_write",
                std::io::Error::from_raw_os_error(code),
            ));
        }
        Ok(self.records.clone())
    }
}

/// Classify the return of `aio_write` and the errno it left behind
fn submission_outcome(index: usize, rc: libc::c_int, code: i32) -> Result<()> {
    match (rc, code) {
        (-1, libc::EAGAIN) => Err(TransferError::NotReady(format!("aio_write #{}", index))),
        (-1, code) => Err(TransferError::os(
            "aio_write",
            std::io::Error::from_raw_os_error(code),
        )),
        _ => Ok(()),
    }
}

/// Apply one submission attempt to `record`; only a refusal is swallowed
fn record_submission(record: &mut CompletionRecord, outcome: Result<()>) -> Result<()> {
    record.submissions += 1;
    match outcome {
        Ok(()) => {
            record.state = OperationState::Issued;
            Ok(())
        }
        Err(e) if e.is_recoverable() => {
            debug!("{}, will reissue", e);
            record.state = OperationState::Pending;
            Ok(())
        }
        Err(e) => {
            let code = match &e {
                TransferError::Os { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
                _ => libc::EIO,
            };
            debug!("aio_write #{} error {}", record.index, code);
            record.state = OperationState::Done;
            record.error = code;
            Err(e)
        }
    }
}

/// Fold an `aio_error` status into the record of an issued operation
fn settle(record: &mut CompletionRecord, status: i32) {
    match status {
        libc::EINPROGRESS => {}
        libc::EAGAIN => record.state = OperationState::Pending,
        code => {
            record.state = OperationState::Done;
            record.error = code;
        }
    }
}

impl Drop for AioBatch<'_> {
    fn drop(&mut self) {
        if self.in_flight().next().is_none() {
            return;
        }
        unsafe { libc::aio_cancel(self.fd, std::ptr::null_mut()) };
        for block in self.blocks.iter() {
            while unsafe { libc::aio_error(block) } == libc::EINPROGRESS {
                let list = [block as *const libc::aiocb];
                unsafe { libc::aio_suspend(list.as_ptr(), 1, std::ptr::null()) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(plan: &ChunkPlan, index: usize) -> CompletionRecord {
        CompletionRecord {
            state: OperationState::Pending,
            submissions: 0,
            ..CompletionRecord::issued(plan.chunk(index))
        }
    }

    #[test]
    fn test_refused_submission_is_reissued() {
        let plan = ChunkPlan::new(4096, 4).unwrap();
        let mut record = pending(&plan, 2);

        let refused = submission_outcome(2, -1, libc::EAGAIN);
        assert!(matches!(&refused, Err(e) if e.is_recoverable()));
        record_submission(&mut record, refused).unwrap();
        assert_eq!(record.state, OperationState::Pending);
        assert_eq!(record.submissions, 1);

        record_submission(&mut record, submission_outcome(2, 0, 0)).unwrap();
        assert_eq!(record.state, OperationState::Issued);
        assert!(record.submissions > 1);
    }

    #[test]
    fn test_submission_error_finishes_record() {
        let plan = ChunkPlan::new(4096, 4).unwrap();
        let mut record = pending(&plan, 0);

        let err = record_submission(&mut record, submission_outcome(0, -1, libc::EBADF));
        assert!(matches!(err, Err(TransferError::Os { op: "aio_write", .. })));
        assert_eq!(record.state, OperationState::Done);
        assert_eq!(record.error, libc::EBADF);
    }

    #[test]
    fn test_settle_status_transitions() {
        let plan = ChunkPlan::new(4096, 4).unwrap();
        let issued = |i| CompletionRecord::issued(plan.chunk(i));

        let mut running = issued(0);
        settle(&mut running, libc::EINPROGRESS);
        assert_eq!(running.state, OperationState::Issued);

        let mut refused = issued(1);
        settle(&mut refused, libc::EAGAIN);
        assert_eq!(refused.state, OperationState::Pending);

        let mut done = issued(2);
        settle(&mut done, 0);
        assert_eq!((done.state, done.error), (OperationState::Done, 0));

        let mut failed = issued(3);
        settle(&mut failed, libc::EIO);
        assert_eq!((failed.state, failed.error), (OperationState::Done, libc::EIO));
        assert!(!failed.succeeded());
    }
}
