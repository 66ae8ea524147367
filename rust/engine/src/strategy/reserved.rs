//! Method 7: placeholder, nothing moves

use super::{ChildContext, ParentContext, TransferStrategy};
use crate::region::{HeapBuffer, ReceivedHeap};
use heapxfer_core::{Method, Result, TransferOutcome};

pub struct ReservedStrategy;

impl TransferStrategy for ReservedStrategy {
    fn method(&self) -> Method {
        Method::Reserved
    }

    fn transfer(
        &self,
        _heap: &mut HeapBuffer,
        _ctx: &mut ParentContext<'_>,
    ) -> Result<TransferOutcome> {
        Ok(TransferOutcome::default())
    }

    fn receive(&self, _ctx: &mut ChildContext<'_>) -> Result<ReceivedHeap> {
        Ok(ReceivedHeap::Nothing)
    }
}
