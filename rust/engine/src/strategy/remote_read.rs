//! Method 0: the child pulls the heap out of the parent

use super::{reserve_parent_heap, ChildContext, ParentContext, TransferStrategy};
use crate::region::{HeapBuffer, ReceivedHeap};
use heapxfer_core::{Method, Result, TransferOutcome};
use tracing::info;

pub struct RemoteReadStrategy;

impl TransferStrategy for RemoteReadStrategy {
    fn method(&self) -> Method {
        Method::RemoteRead
    }

    fn transfer(
        &self,
        _heap: &mut HeapBuffer,
        _ctx: &mut ParentContext<'_>,
    ) -> Result<TransferOutcome> {
        // everything is done by the child
        Ok(TransferOutcome::default())
    }

    fn receive(&self, ctx: &mut ChildContext<'_>) -> Result<ReceivedHeap> {
        let (parent, mut region) = reserve_parent_heap(ctx)?;
        let address = region.address();
        parent.read_exact(address, region.as_mut_slice())?;
        info!("process_vm_readv read {} bytes", region.len());
        Ok(ReceivedHeap::Reserved(region))
    }
}
