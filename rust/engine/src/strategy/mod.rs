//! Transfer strategies
//!
//! One [`TransferStrategy`] per method. The orchestrator drives every
//! strategy through the same three hooks:
//!
//! 1. [`TransferStrategy::allocate`] creates the parent heap (after fork)
//! 2. [`TransferStrategy::transfer`] is the parent's timed work
//! 3. [`TransferStrategy::receive`] is the child's timed work, run after release
//!
//! Whatever a strategy does on one side, the child ends up holding a
//! [`ReceivedHeap`] that the orchestrator validates.

mod aio;
mod mapped_copy;
mod mapped_heap;
mod overlapped;
mod remote_read;
mod remote_write;
mod reserved;
mod sync_write;

pub use aio::AioWriteStrategy;
pub use mapped_copy::MappedCopyStrategy;
pub use mapped_heap::MappedHeapStrategy;
pub use overlapped::OverlappedWriteStrategy;
pub use remote_read::RemoteReadStrategy;
pub use remote_write::RemoteWriteStrategy;
pub use reserved::ReservedStrategy;
pub use sync_write::SyncWriteStrategy;

use crate::backing::{map_heap_file, BackingFile};
use crate::region::{heap_address_slot, HeapBuffer, ReceivedHeap, ReservedRegion};
use crate::remote::RemoteProcess;
use crate::rendezvous::{ChildLink, ParentLink};
use heapxfer_core::{ChunkPlan, Method, Result, TransferConfig, TransferError, TransferOutcome};
use nix::unistd::Pid;
use std::time::Duration;
use tracing::info;

/// One heap transfer mechanism
pub trait TransferStrategy {
    /// Method this strategy implements
    fn method(&self) -> Method;

    /// Allocate the parent heap; anonymous and 64 KiB aligned unless overridden
    fn allocate(&self, ctx: &mut ParentContext<'_>) -> Result<HeapBuffer> {
        HeapBuffer::anonymous(ctx.config.heap_size)
    }

    /// Parent-side work, run on a filled heap
    fn transfer(
        &self,
        heap: &mut HeapBuffer,
        ctx: &mut ParentContext<'_>,
    ) -> Result<TransferOutcome>;

    /// Child-side work, run once the child is released
    fn receive(&self, ctx: &mut ChildContext<'_>) -> Result<ReceivedHeap>;
}

/// Strategy implementing `method`
pub fn strategy_for(method: Method) -> Box<dyn TransferStrategy> {
    match method {
        Method::RemoteRead => Box::new(RemoteReadStrategy),
        Method::SyncWrite => Box::new(SyncWriteStrategy),
        Method::OverlappedWrite => Box::new(OverlappedWriteStrategy),
        Method::MappedCopy => Box::new(MappedCopyStrategy),
        Method::MappedHeap => Box::new(MappedHeapStrategy),
        Method::RemoteWrite => Box::new(RemoteWriteStrategy),
        Method::AioWrite => Box::new(AioWriteStrategy),
        Method::Reserved => Box::new(ReservedStrategy),
    }
}

/// Parent-side state of one method run
pub struct ParentContext<'a> {
    pub config: &'a TransferConfig,
    pub plan: ChunkPlan,
    pub child: Pid,
    /// Pre-transfer checksum, set once the heap is filled
    pub checksum: u32,
    pub link: &'a mut ParentLink,
    backing: Option<BackingFile>,
}

impl<'a> ParentContext<'a> {
    pub fn new(
        config: &'a TransferConfig,
        plan: ChunkPlan,
        child: Pid,
        link: &'a mut ParentLink,
    ) -> Self {
        Self {
            config,
            plan,
            child,
            checksum: 0,
            link,
            backing: None,
        }
    }

    /// Create the run's backing file at the configured scratch path
    pub fn create_backing(&mut self, custom_flags: i32) -> Result<&BackingFile> {
        if let Some(mut stale) = self.backing.take() {
            stale.teardown()?;
        }
        let backing = BackingFile::create(
            &self.config.scratch_path,
            self.config.heap_size,
            custom_flags,
        )?;
        Ok(self.backing.insert(backing))
    }

    pub fn backing(&self) -> Result<&BackingFile> {
        self.backing
            .as_ref()
            .ok_or_else(|| TransferError::Configuration("no backing file for this run".to_string()))
    }

    /// Hand the backing file to the orchestrator for teardown after reaping
    pub fn take_backing(&mut self) -> Option<BackingFile> {
        self.backing.take()
    }
}

/// Child-side state of one method run
pub struct ChildContext<'a> {
    pub config: &'a TransferConfig,
    pub parent: Pid,
    pub link: &'a mut ChildLink,
    /// Time spent blocked on the parent inside `receive`, not charged as work
    pub handshake_wait: Duration,
}

impl<'a> ChildContext<'a> {
    pub fn new(config: &'a TransferConfig, parent: Pid, link: &'a mut ChildLink) -> Self {
        Self {
            config,
            parent,
            link,
            handshake_wait: Duration::ZERO,
        }
    }
}

/// Reserve the parent's heap address range in the child
///
/// The address is read out of the parent, where it was published after
/// allocation.
fn reserve_parent_heap(ctx: &ChildContext<'_>) -> Result<(RemoteProcess, ReservedRegion)> {
    let parent = RemoteProcess::new(ctx.parent);
    let address = parent.read_usize(heap_address_slot())?;
    if address == 0 {
        return Err(TransferError::Rendezvous(
            "parent has not published a heap address".to_string(),
        ));
    }
    let region = ReservedRegion::at(address, ctx.config.heap_size)?;
    info!("child heap allocated at {:#x}", region.address());
    Ok((parent, region))
}

/// Map the backing file read-only, the child half of every file-based method
fn map_backing(ctx: &ChildContext<'_>) -> Result<ReceivedHeap> {
    let map = map_heap_file(&ctx.config.scratch_path, ctx.config.heap_size)?;
    Ok(ReceivedHeap::Mapped(map))
}
