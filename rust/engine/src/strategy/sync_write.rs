//! Method 1: one positional write of the whole heap

use super::{map_backing, ChildContext, ParentContext, TransferStrategy};
use crate::region::{HeapBuffer, ReceivedHeap};
use heapxfer_core::{Method, Result, TransferError, TransferOutcome};
use std::os::unix::fs::FileExt;
use tracing::info;

pub struct SyncWriteStrategy;

impl TransferStrategy for SyncWriteStrategy {
    fn method(&self) -> Method {
        Method::SyncWrite
    }

    fn transfer(
        &self,
        heap: &mut HeapBuffer,
        ctx: &mut ParentContext<'_>,
    ) -> Result<TransferOutcome> {
        let backing = ctx.create_backing(0)?;
        let bytes = heap.as_slice()?;
        backing
            .file()?
            .write_all_at(bytes, 0)
            .map_err(|e| TransferError::os("pwrite", e))?;
        info!("pwrite wrote {} bytes", bytes.len());
        Ok(TransferOutcome::with_bytes(bytes.len() as u64))
    }

    fn receive(&self, ctx: &mut ChildContext<'_>) -> Result<ReceivedHeap> {
        map_backing(ctx)
    }
}
