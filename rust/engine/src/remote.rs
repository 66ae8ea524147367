//! Cross-process memory access
//!
//! A narrow capability over another process's address space: read or write
//! N bytes at a remote address. Built on `process_vm_readv`/`process_vm_writev`,
//! so each call is a single kernel copy with no intermediate buffer.

use crate::platform::{expect_len, os_error};
use heapxfer_core::Result;
use nix::sys::uio::{process_vm_readv, process_vm_writev, RemoteIoVec};
use nix::unistd::Pid;
use std::io::{IoSlice, IoSliceMut};

/// Handle on a target process's memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteProcess {
    pid: Pid,
}

impl RemoteProcess {
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }

    /// Copy `buf.len()` bytes from `remote_addr` into `buf`, returning the count moved
    pub fn read_into(&self, remote_addr: usize, buf: &mut [u8]) -> Result<usize> {
        let remote = [RemoteIoVec {
            base: remote_addr,
            len: buf.len(),
        }];
        let mut local = [IoSliceMut::new(buf)];
        process_vm_readv(self.pid, &mut local, &remote).map_err(os_error("process_vm_readv"))
    }

    /// Read exactly `buf.len()` bytes in one call
    pub fn read_exact(&self, remote_addr: usize, buf: &mut [u8]) -> Result<()> {
        let expected = buf.len();
        let moved = self.read_into(remote_addr, buf)?;
        expect_len("process_vm_readv", moved, expected)
    }

    /// Read a pointer-sized value stored at `remote_addr`
    pub fn read_usize(&self, remote_addr: usize) -> Result<usize> {
        let mut raw = [0u8; std::mem::size_of::<usize>()];
        self.read_exact(remote_addr, &mut raw)?;
        Ok(usize::from_ne_bytes(raw))
    }

    /// Copy `buf` to `remote_addr`, returning the count moved
    pub fn write_from(&self, remote_addr: usize, buf: &[u8]) -> Result<usize> {
        let remote = [RemoteIoVec {
            base: remote_addr,
            len: buf.len(),
        }];
        let local = [IoSlice::new(buf)];
        process_vm_writev(self.pid, &local, &remote).map_err(os_error("process_vm_writev"))
    }

    /// Write all of `buf` in one call
    pub fn write_exact(&self, remote_addr: usize, buf: &[u8]) -> Result<()> {
        let moved = self.write_from(remote_addr, buf)?;
        expect_len("process_vm_writev", moved, buf.len())
    }
}
