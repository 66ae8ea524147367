//! Catalogue of heap transfer methods

use crate::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Heap transfer method, indexed the way the command line selects it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Method {
    /// Child reads the parent's heap across the process boundary
    RemoteRead = 0,
    /// Parent writes the heap synchronously to the backing file
    SyncWrite = 1,
    /// Parent issues chunked overlapped writes with completion callbacks
    OverlappedWrite = 2,
    /// Parent maps the backing file, copies the heap in and flushes
    MappedCopy = 3,
    /// Parent heap is itself a mapping of the backing file
    MappedHeap = 4,
    /// Parent writes the heap into the child's reserved region
    RemoteWrite = 5,
    /// Parent issues chunked POSIX AIO writes with signal notification
    AioWrite = 6,
    /// Reserved for a future mechanism
    Reserved = 7,
}

/// Which process performs the transfer work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Executor {
    Child,
    Parent,
    Split,
    Nobody,
}

/// How completion of the transfer is established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionModel {
    Synchronous,
    Callback,
    Signal,
    Mapping,
    None,
}

impl Method {
    /// Number of methods
    pub const COUNT: usize = 8;

    /// All methods in run order
    pub const ALL: [Method; Method::COUNT] = [
        Method::RemoteRead,
        Method::SyncWrite,
        Method::OverlappedWrite,
        Method::MappedCopy,
        Method::MappedHeap,
        Method::RemoteWrite,
        Method::AioWrite,
        Method::Reserved,
    ];

    /// Look a method up by its index
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL.get(index).copied().ok_or_else(|| {
            TransferError::Configuration(format!(
                "method {} out of range [0..{}]",
                index,
                Self::COUNT - 1
            ))
        })
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            Method::RemoteRead => "process_vm_readv",
            Method::SyncWrite => "Synchronous write",
            Method::OverlappedWrite => "Overlapped write with completion callbacks",
            Method::MappedCopy => "mmap, copy, msync",
            Method::MappedHeap => "Alloc heap from mapped space",
            Method::RemoteWrite => "process_vm_writev",
            Method::AioWrite => "AIO write",
            Method::Reserved => "TBD extension",
        }
    }

    pub fn executor(self) -> Executor {
        match self {
            Method::RemoteRead => Executor::Child,
            Method::RemoteWrite => Executor::Split,
            Method::Reserved => Executor::Nobody,
            _ => Executor::Parent,
        }
    }

    pub fn completion_model(self) -> CompletionModel {
        match self {
            Method::RemoteRead | Method::SyncWrite | Method::RemoteWrite => {
                CompletionModel::Synchronous
            }
            Method::OverlappedWrite => CompletionModel::Callback,
            Method::AioWrite => CompletionModel::Signal,
            Method::MappedCopy | Method::MappedHeap => CompletionModel::Mapping,
            Method::Reserved => CompletionModel::None,
        }
    }

    /// Whether the child ends up with a buffer to validate
    pub fn transfers_bytes(self) -> bool {
        self != Method::Reserved
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method {} - {}", self.index(), self.name())
    }
}

impl fmt::Display for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self {
            Executor::Child => "child",
            Executor::Parent => "parent",
            Executor::Split => "split",
            Executor::Nobody => "-",
        };
        f.pad(side)
    }
}

impl TryFrom<usize> for Method {
    type Error = TransferError;

    fn try_from(index: usize) -> Result<Self> {
        Method::from_index(index)
    }
}
