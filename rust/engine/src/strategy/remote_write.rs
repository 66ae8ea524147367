//! Method 5: the parent pushes the heap into a reservation made by the child
//!
//! The child must reserve before the parent writes, so this method has an
//! inner handshake: `Ready` from the child, `WriteDone` from the parent. Each
//! side's wait on the other is excluded from its work time.

use super::{reserve_parent_heap, ChildContext, ParentContext, TransferStrategy};
use crate::region::{HeapBuffer, ReceivedHeap};
use crate::remote::RemoteProcess;
use heapxfer_core::{Method, Result, TransferError, TransferOutcome};
use std::time::Instant;
use tracing::{debug, info};

pub struct RemoteWriteStrategy;

impl TransferStrategy for RemoteWriteStrategy {
    fn method(&self) -> Method {
        Method::RemoteWrite
    }

    fn transfer(
        &self,
        heap: &mut HeapBuffer,
        ctx: &mut ParentContext<'_>,
    ) -> Result<TransferOutcome> {
        ctx.link.release(ctx.checksum)?;

        let waiting = Instant::now();
        let address = ctx.link.wait_ready()?;
        let handshake_wait = waiting.elapsed();
        debug!("child ready at {:#x} after {:?}", address, handshake_wait);

        if address != heap.address() as u64 {
            return Err(TransferError::Rendezvous(format!(
                "child reserved {:#x}, parent heap is at {:#x}",
                address,
                heap.address()
            )));
        }

        let source = heap.as_slice()?;
        RemoteProcess::new(ctx.child).write_exact(address as usize, source)?;
        info!("process_vm_writev wrote {} bytes", source.len());
        ctx.link.write_done()?;

        Ok(TransferOutcome {
            handshake_wait_micros: handshake_wait.as_micros() as u64,
            ..TransferOutcome::with_bytes(source.len() as u64)
        })
    }

    fn receive(&self, ctx: &mut ChildContext<'_>) -> Result<ReceivedHeap> {
        let (_, region) = reserve_parent_heap(ctx)?;
        ctx.link.ready(region.address() as u64)?;

        let waiting = Instant::now();
        ctx.link.wait_write_done()?;
        ctx.handshake_wait += waiting.elapsed();

        Ok(ReceivedHeap::Reserved(region))
    }
}
