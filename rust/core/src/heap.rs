//! Heap layout: chunk plan and fill pattern

use crate::{checksum, Result, TransferError, SENTINEL};
use serde::{Deserialize, Serialize};

/// One asynchronous chunk of the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub offset: usize,
    pub len: usize,
}

/// Split of the heap into equal, offset-indexed chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    heap_size: usize,
    count: usize,
}

impl ChunkPlan {
    pub fn new(heap_size: usize, count: usize) -> Result<Self> {
        if count == 0 || heap_size % count != 0 {
            return Err(TransferError::Configuration(format!(
                "{} asyncios don't divide heapsize {} evenly",
                count, heap_size
            )));
        }
        Ok(Self { heap_size, count })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn chunk_size(&self) -> usize {
        self.heap_size / self.count
    }

    pub fn heap_size(&self) -> usize {
        self.heap_size
    }

    pub fn chunk(&self, index: usize) -> Chunk {
        let len = self.chunk_size();
        Chunk {
            index,
            offset: index * len,
            len,
        }
    }

    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        (0..self.count).map(move |i| self.chunk(i))
    }
}

/// Recognisable heap contents: one byte value per chunk, sentinels at both ends
#[derive(Debug, Clone, Copy)]
pub struct HeapPattern {
    plan: ChunkPlan,
}

impl HeapPattern {
    /// First chunk's fill byte ('@'); chunk `i` uses `'@' + i`
    pub const BASE: u8 = 64;

    pub fn new(plan: ChunkPlan) -> Self {
        Self { plan }
    }

    pub fn fill_byte(index: usize) -> u8 {
        Self::BASE.wrapping_add(index as u8)
    }

    /// Fill `heap` and return its checksum
    pub fn fill(&self, heap: &mut [u8]) -> u32 {
        debug_assert_eq!(heap.len(), self.plan.heap_size());
        for chunk in self.plan.chunks() {
            heap[chunk.offset..chunk.offset + chunk.len].fill(Self::fill_byte(chunk.index));
        }
        if let Some(first) = heap.first_mut() {
            *first = SENTINEL;
        }
        if let Some(last) = heap.last_mut() {
            *last = SENTINEL;
        }
        checksum(heap)
    }
}

/// Check a received heap against the parent's checksum and the sentinels
pub fn verify_heap(heap: &[u8], expected_checksum: u32) -> Result<u32> {
    let actual = checksum(heap);
    if actual != expected_checksum {
        return Err(TransferError::Verification(format!(
            "child cksum {:08X} != parent cksum {:08X}",
            actual, expected_checksum
        )));
    }
    if heap.first() != Some(&SENTINEL) {
        return Err(TransferError::Verification(
            "read first byte of heap failed".to_string(),
        ));
    }
    if heap.last() != Some(&SENTINEL) {
        return Err(TransferError::Verification(
            "read last byte of heap failed".to_string(),
        ));
    }
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_plan_offsets() {
        let plan = ChunkPlan::new(64 * crate::MIB, 4).unwrap();
        let offsets: Vec<usize> = plan.chunks().map(|c| c.offset).collect();
        assert_eq!(
            offsets,
            vec![0, 16 * crate::MIB, 32 * crate::MIB, 48 * crate::MIB]
        );
        assert!(plan.chunks().all(|c| c.len == 16 * crate::MIB));
        assert_eq!(plan.chunks().map(|c| c.len).sum::<usize>(), 64 * crate::MIB);
    }

    #[test]
    fn test_chunk_plan_rejects_indivisible() {
        assert!(ChunkPlan::new(100, 3).is_err());
        assert!(ChunkPlan::new(100, 0).is_err());
    }

    #[test]
    fn test_pattern_layout() {
        let plan = ChunkPlan::new(40, 4).unwrap();
        let mut heap = vec![0u8; 40];
        HeapPattern::new(plan).fill(&mut heap);

        assert_eq!(heap[0], SENTINEL);
        assert_eq!(heap[39], SENTINEL);
        assert_eq!(&heap[1..10], &[b'@'; 9]);
        assert_eq!(&heap[10..20], &[b'A'; 10]);
        assert_eq!(&heap[20..30], &[b'B'; 10]);
        assert_eq!(&heap[30..39], &[b'C'; 9]);
    }

    #[test]
    fn test_verify_heap() {
        let plan = ChunkPlan::new(4096, 2).unwrap();
        let mut heap = vec![0u8; 4096];
        let sum = HeapPattern::new(plan).fill(&mut heap);

        assert_eq!(verify_heap(&heap, sum).unwrap(), sum);

        let mut corrupted = heap.clone();
        corrupted[2048] ^= 1;
        assert!(matches!(
            verify_heap(&corrupted, sum),
            Err(TransferError::Verification(_))
        ));

        // sentinel lost but checksum recomputed to match
        let mut unmarked = heap.clone();
        unmarked[0] = b'@';
        let unmarked_sum = checksum(&unmarked);
        assert!(verify_heap(&unmarked, unmarked_sum).is_err());
    }
}
