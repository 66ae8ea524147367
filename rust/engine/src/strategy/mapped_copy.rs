//! Method 3: map the backing file, copy the heap in, flush twice

use super::{map_backing, ChildContext, ParentContext, TransferStrategy};
use crate::region::{HeapBuffer, ReceivedHeap};
use heapxfer_core::{Method, PerformanceMeasurement, Result, TransferError, TransferOutcome};
use memmap2::MmapOptions;
use tracing::info;

pub struct MappedCopyStrategy;

impl TransferStrategy for MappedCopyStrategy {
    fn method(&self) -> Method {
        Method::MappedCopy
    }

    fn transfer(
        &self,
        heap: &mut HeapBuffer,
        ctx: &mut ParentContext<'_>,
    ) -> Result<TransferOutcome> {
        let backing = ctx.create_backing(0)?;
        let file = backing.file()?;
        let source = heap.as_slice()?;

        let mut view = unsafe { MmapOptions::new().len(source.len()).map_mut(file) }
            .map_err(|e| TransferError::os("mmap", e))?;

        let measurement = PerformanceMeasurement::start("copy");
        view.copy_from_slice(source);
        let (_, copy_time) = measurement.finish();
        info!(" (copy took {}ms)", copy_time.as_millis());

        view.flush().map_err(|e| TransferError::os("msync", e))?;
        file.sync_all().map_err(|e| TransferError::os("fsync", e))?;
        info!("map&copy&flush wrote {} bytes", source.len());

        Ok(TransferOutcome {
            copy_micros: Some(copy_time.as_micros() as u64),
            ..TransferOutcome::with_bytes(source.len() as u64)
        })
    }

    fn receive(&self, ctx: &mut ChildContext<'_>) -> Result<ReceivedHeap> {
        map_backing(ctx)
    }
}
