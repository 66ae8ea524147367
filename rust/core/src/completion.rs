//! Completion records of asynchronous sub-operations

use crate::Chunk;
use serde::{Deserialize, Serialize};

/// State of one asynchronous operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    /// Submitted to the kernel or a completion worker
    Issued,
    /// Not accepted yet, waiting to be reissued
    Pending,
    /// Finished, successfully or not
    Done,
}

/// Snapshot of one asynchronous operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub index: usize,
    pub offset: u64,
    pub len: u64,
    pub state: OperationState,
    /// Bytes the operation reported as written
    pub bytes: u64,
    /// OS error code, 0 on success
    pub error: i32,
    /// How many times the operation was submitted
    pub submissions: u32,
}

impl CompletionRecord {
    pub fn issued(chunk: Chunk) -> Self {
        Self {
            index: chunk.index,
            offset: chunk.offset as u64,
            len: chunk.len as u64,
            state: OperationState::Issued,
            bytes: 0,
            error: 0,
            submissions: 1,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == OperationState::Done && self.error == 0 && self.bytes == self.len
    }
}

/// Total bytes reported by a set of records once none is outstanding
pub fn settled_total(records: &[CompletionRecord]) -> Option<u64> {
    if records.iter().any(|r| r.state != OperationState::Done) {
        return None;
    }
    Some(records.iter().map(|r| r.bytes).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChunkPlan;

    #[test]
    fn test_settled_total() {
        let plan = ChunkPlan::new(4096, 4).unwrap();
        let mut records: Vec<_> = plan.chunks().map(CompletionRecord::issued).collect();
        assert_eq!(settled_total(&records), None);

        for record in records.iter_mut() {
            record.state = OperationState::Done;
            record.bytes = record.len;
        }
        assert_eq!(settled_total(&records), Some(4096));
        assert!(records.iter().all(CompletionRecord::succeeded));
    }
}
