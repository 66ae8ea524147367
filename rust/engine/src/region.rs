//! Heap memory regions
//!
//! The parent's heap is either an anonymous mapping aligned to 64 KiB or a
//! shared mapping of the backing file. The child's landing area for the
//! cross-process strategies is a reservation at the parent's heap address.

use crate::platform::{PlatformUtils, HEAP_ALIGNMENT};
use heapxfer_core::{Result, TransferError};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::File;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Address of the parent's current heap
///
/// The child reads this slot out of the parent's address space; its own copy
/// is stale because the heap is allocated after fork.
static HEAP_ADDRESS: AtomicUsize = AtomicUsize::new(0);

/// Record the heap address for cross-process readers
pub fn publish_heap_address(address: usize) {
    HEAP_ADDRESS.store(address, Ordering::SeqCst);
}

/// Where the published address lives, identical in parent and child
pub fn heap_address_slot() -> usize {
    &HEAP_ADDRESS as *const AtomicUsize as usize
}

/// Parent heap buffer
pub enum HeapBuffer {
    /// Anonymous private mapping, over-reserved so the heap starts 64 KiB aligned
    Anonymous {
        map: MmapMut,
        offset: usize,
        len: usize,
    },
    /// Shared mapping of the backing file
    FileBacked { map: MmapMut },
    /// Mapping flushed and unmapped; only the former address remains
    Released { address: usize, len: usize },
}

impl HeapBuffer {
    /// Allocate an anonymous heap aligned to [`HEAP_ALIGNMENT`]
    pub fn anonymous(len: usize) -> Result<Self> {
        let map = MmapMut::map_anon(len + HEAP_ALIGNMENT)
            .map_err(|e| TransferError::os("mmap", e))?;
        let base = map.as_ptr() as usize;
        let offset = PlatformUtils::align_up(base, HEAP_ALIGNMENT) - base;
        Ok(HeapBuffer::Anonymous { map, offset, len })
    }

    /// Map `len` bytes of `file` read/write and shared as the heap itself
    pub fn file_backed(file: &File, len: usize) -> Result<Self> {
        let map = unsafe { MmapOptions::new().len(len).map_mut(file) }
            .map_err(|e| TransferError::os("mmap", e))?;
        Ok(HeapBuffer::FileBacked { map })
    }

    pub fn len(&self) -> usize {
        match self {
            HeapBuffer::Anonymous { len, .. } => *len,
            HeapBuffer::FileBacked { map } => map.len(),
            HeapBuffer::Released { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn address(&self) -> usize {
        match self {
            HeapBuffer::Anonymous { map, offset, .. } => map.as_ptr() as usize + offset,
            HeapBuffer::FileBacked { map } => map.as_ptr() as usize,
            HeapBuffer::Released { address, .. } => *address,
        }
    }

    pub fn as_slice(&self) -> Result<&[u8]> {
        match self {
            HeapBuffer::Anonymous { map, offset, len } => Ok(&map[*offset..*offset + *len]),
            HeapBuffer::FileBacked { map } => Ok(&map[..]),
            HeapBuffer::Released { .. } => Err(released()),
        }
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match self {
            HeapBuffer::Anonymous { map, offset, len } => Ok(&mut map[*offset..*offset + *len]),
            HeapBuffer::FileBacked { map } => Ok(&mut map[..]),
            HeapBuffer::Released { .. } => Err(released()),
        }
    }

    /// Flush a file-backed heap to its file and unmap it
    pub fn flush_and_release(&mut self) -> Result<()> {
        let address = self.address();
        let len = self.len();
        if let HeapBuffer::FileBacked { map } = self {
            map.flush().map_err(|e| TransferError::os("msync", e))?;
        }
        *self = HeapBuffer::Released { address, len };
        Ok(())
    }
}

fn released() -> TransferError {
    TransferError::Verification("heap accessed after release".to_string())
}

/// Anonymous read/write mapping placed at a caller-chosen address
pub struct ReservedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl ReservedRegion {
    /// Reserve `len` bytes at exactly `address`
    ///
    /// Fails if anything is already mapped there; kernels that treat the
    /// request as a hint and place it elsewhere are caught too.
    pub fn at(address: usize, len: usize) -> Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                address as *mut libc::c_void,
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED_NOREPLACE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(TransferError::last_os_error("mmap"));
        }
        if ptr as usize != address {
            unsafe { libc::munmap(ptr, len) };
            return Err(TransferError::os(
                "mmap",
                std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("reservation returned {:p}, wanted {:#x}", ptr, address),
                ),
            ));
        }
        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| {
            TransferError::os(
                "mmap",
                std::io::Error::new(std::io::ErrorKind::Other, "mmap returned null"),
            )
        })?;
        Ok(Self { ptr, len })
    }

    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get a slice view of the memory
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Get a mutable slice view of the memory
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for ReservedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

/// Heap as seen by the child after its strategy completes
pub enum ReceivedHeap {
    /// Private read-only view of the backing file
    Mapped(Mmap),
    /// Reservation filled across the process boundary
    Reserved(ReservedRegion),
    /// Nothing was transferred
    Nothing,
}

impl ReceivedHeap {
    pub fn as_slice(&self) -> Option<&[u8]> {
        match self {
            ReceivedHeap::Mapped(map) => Some(&map[..]),
            ReceivedHeap::Reserved(region) => Some(region.as_slice()),
            ReceivedHeap::Nothing => None,
        }
    }

    pub fn address(&self) -> usize {
        match self {
            ReceivedHeap::Mapped(map) => map.as_ptr() as usize,
            ReceivedHeap::Reserved(region) => region.address(),
            ReceivedHeap::Nothing => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_anonymous_heap_alignment() {
        let mut heap = HeapBuffer::anonymous(100_000).unwrap();
        assert_eq!(heap.address() % HEAP_ALIGNMENT, 0);
        assert_eq!(heap.len(), 100_000);

        let slice = heap.as_mut_slice().unwrap();
        slice[0] = b'+';
        slice[99_999] = b'+';
        assert_eq!(heap.as_slice().unwrap()[99_999], b'+');
    }

    #[test]
    fn test_file_backed_heap_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heapfile");
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();
        file.set_len(8192).unwrap();

        let mut heap = HeapBuffer::file_backed(&file, 8192).unwrap();
        let address = heap.address();
        heap.as_mut_slice().unwrap().fill(b'@');
        heap.flush_and_release().unwrap();

        assert_eq!(heap.address(), address);
        assert!(heap.as_slice().is_err());

        let mut contents = Vec::new();
        std::fs::File::open(&path)
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert!(contents.iter().all(|&b| b == b'@'));
    }

    #[test]
    fn test_reserved_region_at_free_address() {
        // find a free, suitably aligned address by mapping and unmapping
        let probe = HeapBuffer::anonymous(1 << 20).unwrap();
        let address = probe.address();
        drop(probe);

        let mut region = ReservedRegion::at(address, 1 << 20).unwrap();
        assert_eq!(region.address(), address);
        region.as_mut_slice()[0] = 1;
        assert_eq!(region.as_slice()[0], 1);

        // same address again must be refused while the first is live
        assert!(ReservedRegion::at(address, 1 << 20).is_err());
    }

    #[test]
    fn test_published_address() {
        publish_heap_address(0x1234_0000);
        let slot = heap_address_slot() as *const AtomicUsize;
        assert_eq!(unsafe { &*slot }.load(Ordering::SeqCst), 0x1234_0000);
        publish_heap_address(0);
    }
}
