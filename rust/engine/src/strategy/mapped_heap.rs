//! Method 4: the heap is a shared mapping of the backing file
//!
//! Filling the heap already writes the file, so the timed parent work is
//! only the final flush and unmap.

use super::{map_backing, ChildContext, ParentContext, TransferStrategy};
use crate::region::{HeapBuffer, ReceivedHeap};
use heapxfer_core::{Method, Result, TransferOutcome};
use tracing::info;

pub struct MappedHeapStrategy;

impl TransferStrategy for MappedHeapStrategy {
    fn method(&self) -> Method {
        Method::MappedHeap
    }

    fn allocate(&self, ctx: &mut ParentContext<'_>) -> Result<HeapBuffer> {
        let len = ctx.config.heap_size;
        let backing = ctx.create_backing(0)?;
        HeapBuffer::file_backed(backing.file()?, len)
    }

    fn transfer(
        &self,
        heap: &mut HeapBuffer,
        _ctx: &mut ParentContext<'_>,
    ) -> Result<TransferOutcome> {
        let len = heap.len();
        heap.flush_and_release()?;
        info!("mapped heap flushed, {} bytes", len);
        Ok(TransferOutcome::with_bytes(len as u64))
    }

    fn receive(&self, ctx: &mut ChildContext<'_>) -> Result<ReceivedHeap> {
        map_backing(ctx)
    }
}
