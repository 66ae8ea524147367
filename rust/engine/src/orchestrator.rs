//! Process orchestrator
//!
//! Runs each selected method in a fresh fork. The child blocks on the
//! rendezvous link until the parent has allocated, filled and checksummed
//! the heap and finished its own share of the work, so neither side's
//! timed window includes process creation or setup.

use crate::platform::{os_error, PlatformUtils};
use crate::region::{publish_heap_address, HeapBuffer};
use crate::rendezvous::{channel, ChildLink, ParentLink};
use crate::strategy::{strategy_for, ChildContext, ParentContext, TransferStrategy};
use heapxfer_core::{
    verify_heap, ChildExit, ChildReport, ChunkPlan, HeapPattern, Method, MethodReport, PhaseClock,
    Result, RunSummary, TransferConfig, TransferError, TransferOutcome, MIB,
};
use nix::errno::Errno;
use nix::sys::wait::{wait, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::time::Duration;
use tracing::{error, info, info_span, warn};

/// Parent-side results of one method, heap kept alive until the child is reaped
struct ParentWork {
    heap: HeapBuffer,
    heap_address: usize,
    checksum: u32,
    outcome: TransferOutcome,
    work: Duration,
}

/// Runs methods one after another, one child process per method
pub struct Orchestrator {
    config: TransferConfig,
}

impl Orchestrator {
    /// Validate `config`; every configuration error surfaces here, before any fork
    pub fn new(config: TransferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Run every selected method in order
    pub fn run(&self) -> Result<RunSummary> {
        info!(
            "running with heapsize {} ({} MB), asyncios {}",
            self.config.heap_size,
            self.config.heap_size / MIB,
            self.config.asyncios
        );
        info!("parent pid {} started", PlatformUtils::process_id());

        let mut summary = RunSummary::default();
        for method in self.config.selected_methods() {
            summary.push(self.run_method(method)?);
        }
        Ok(summary)
    }

    /// Fork, transfer with `method`, validate in the child and reap it
    pub fn run_method(&self, method: Method) -> Result<MethodReport> {
        self.run_strategy(strategy_for(method).as_ref())
    }

    /// Fork, transfer with `strategy`, validate in the child and reap it
    ///
    /// Only returns in the parent; the child exits with 0 after successful
    /// validation and 1 otherwise.
    pub fn run_strategy(&self, strategy: &dyn TransferStrategy) -> Result<MethodReport> {
        let method = strategy.method();
        info!("*** {} ***", method);
        info!(
            "work done by {}, completion {:?}",
            method.executor(),
            method.completion_model()
        );
        let clock = PhaseClock::start();
        let (parent_link, child_link) = channel()?;

        match unsafe { fork() }.map_err(os_error("fork"))? {
            ForkResult::Child => {
                drop(parent_link);
                let code = self.child_main(strategy, child_link, &clock);
                std::process::exit(code);
            }
            ForkResult::Parent { child } => {
                drop(child_link);
                self.parent_main(strategy, parent_link, child, &clock)
            }
        }
    }

    fn parent_main(
        &self,
        strategy: &dyn TransferStrategy,
        mut link: ParentLink,
        child: Pid,
        clock: &PhaseClock,
    ) -> Result<MethodReport> {
        let method = strategy.method();
        let span = info_span!(
            "parent",
            pid = %PlatformUtils::process_id(),
            method = method.index()
        );
        let _enter = span.enter();

        PlatformUtils::grant_memory_access(child);
        let plan = ChunkPlan::new(self.config.heap_size, self.config.asyncios)?;

        let (work, backing) = {
            let mut ctx = ParentContext::new(&self.config, plan, child, &mut link);
            let work = self.parent_work(strategy, &mut ctx, clock);
            (work, ctx.take_backing())
        };

        let child_report = match &work {
            Ok(work) => Self::collect_child(&mut link, work.checksum),
            Err(_) => Ok(None),
        };

        // closing the link wakes a child still blocked on it
        drop(link);
        let child_exit = Self::reap(child);

        if let Some(mut backing) = backing {
            if let Err(e) = backing.teardown() {
                error!("backing file teardown failed: {}", e);
            }
        }
        PlatformUtils::revoke_memory_access();
        publish_heap_address(0);

        let work = work?;
        let child_report = child_report?;
        let child_exit = child_exit?;

        if !child_exit.success() || child_report.is_none() {
            let reason = match &child_exit {
                ChildExit::Exited(0) => "exited without reporting".to_string(),
                ChildExit::Exited(code) => format!("exited with status {}", code),
                ChildExit::Signaled(signal) => format!("killed by {}", signal),
            };
            if self.config.strict_child_status {
                return Err(TransferError::ChildFailed {
                    pid: child.as_raw(),
                    reason,
                });
            }
            warn!("child {} {}", child, reason);
        }

        let ParentWork {
            heap,
            heap_address,
            checksum,
            outcome,
            work,
        } = work;
        drop(heap);

        Ok(MethodReport {
            method,
            heap_size: self.config.heap_size as u64,
            asyncios: self.config.asyncios,
            heap_address: heap_address as u64,
            parent_checksum: checksum,
            parent_work_micros: work.as_micros() as u64,
            transfer: outcome,
            child: child_report,
            child_exit,
        })
    }

    fn parent_work(
        &self,
        strategy: &dyn TransferStrategy,
        ctx: &mut ParentContext<'_>,
        clock: &PhaseClock,
    ) -> Result<ParentWork> {
        let mut heap = strategy.allocate(ctx)?;
        let heap_address = heap.address();
        publish_heap_address(heap_address);
        info!("parent heap allocated at {:#x}", heap_address);

        let checksum = HeapPattern::new(ctx.plan).fill(heap.as_mut_slice()?);
        ctx.checksum = checksum;
        info!("parent cksum {:08X}", checksum);

        let begin = clock.elapsed();
        info!("begin parent work {}ms", begin.as_millis());
        let outcome = strategy.transfer(&mut heap, ctx)?;
        let end = clock.elapsed();
        info!("end parent work {}ms", end.as_millis());

        let work = end.saturating_sub(begin).saturating_sub(outcome.handshake_wait());
        info!("total parent time {}ms ***", work.as_millis());

        Ok(ParentWork {
            heap,
            heap_address,
            checksum,
            outcome,
            work,
        })
    }

    /// Release the child (unless the strategy already did) and wait for its report
    fn collect_child(link: &mut ParentLink, checksum: u32) -> Result<Option<ChildReport>> {
        link.release(checksum)?;
        link.wait_done()
    }

    /// Reap exactly `child`; interrupted waits are retried
    fn reap(child: Pid) -> Result<ChildExit> {
        loop {
            let (pid, exit) = match wait() {
                Ok(WaitStatus::Exited(pid, code)) => (pid, ChildExit::Exited(code)),
                Ok(WaitStatus::Signaled(pid, signal, _)) => {
                    (pid, ChildExit::Signaled(signal.as_str().to_string()))
                }
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(os_error("wait")(errno)),
            };
            if pid != child {
                return Err(TransferError::ChildFailed {
                    pid: pid.as_raw(),
                    reason: format!("wait() returned wrong pid {}, expected {}", pid, child),
                });
            }
            return Ok(exit);
        }
    }

    fn child_main(
        &self,
        strategy: &dyn TransferStrategy,
        mut link: ChildLink,
        clock: &PhaseClock,
    ) -> i32 {
        let span = info_span!(
            "child",
            pid = %PlatformUtils::process_id(),
            method = strategy.method().index()
        );
        let _enter = span.enter();
        info!("child pid {} started", PlatformUtils::process_id());

        let result = self
            .child_work(strategy, &mut link, clock)
            .and_then(|report| link.done(report));
        match result {
            Ok(()) => 0,
            Err(e) => {
                error!(category = ?e.category(), "{}", e);
                1
            }
        }
    }

    fn child_work(
        &self,
        strategy: &dyn TransferStrategy,
        link: &mut ChildLink,
        clock: &PhaseClock,
    ) -> Result<ChildReport> {
        let expected = link.wait_release()?;
        let begin = clock.elapsed();
        info!("begin child work {}ms", begin.as_millis());

        let mut ctx = ChildContext::new(&self.config, PlatformUtils::parent_process_id(), link);
        let received = strategy.receive(&mut ctx)?;
        let handshake_wait = ctx.handshake_wait;

        let end = clock.elapsed();
        info!("end child work {}ms", end.as_millis());
        let work = end.saturating_sub(begin).saturating_sub(handshake_wait);
        info!("total child time {}ms ***", work.as_millis());

        let (checksum, received_bytes) = match received.as_slice() {
            Some(heap) => {
                let checksum = verify_heap(heap, expected)?;
                info!("child cksum {:08X}", checksum);
                (Some(checksum), heap.len() as u64)
            }
            None => {
                info!("nothing transferred, validation skipped");
                (None, 0)
            }
        };

        Ok(ChildReport {
            checksum,
            received_bytes,
            address: received.address() as u64,
            work_micros: work.as_micros() as u64,
            handshake_wait_micros: handshake_wait.as_micros() as u64,
        })
    }
}
