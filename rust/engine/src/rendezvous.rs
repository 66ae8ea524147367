//! Parent/child rendezvous link
//!
//! A connected socket pair created before fork. Each side holds one end and
//! exchanges small bincode-encoded signals, so a blocked process wakes only
//! when its peer says so and a dead peer shows up as end-of-stream.

use heapxfer_core::{ChildReport, Result, TransferError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::os::unix::net::UnixStream;
use tracing::debug;

/// Signals sent by the parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParentSignal {
    /// Start child work; carries the parent's pre-transfer checksum
    Release { checksum: u32 },
    /// Cross-process write into the child's reservation finished
    WriteDone,
}

/// Signals sent by the child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildSignal {
    /// Reservation at `address` is in place
    Ready { address: u64 },
    /// Terminal validation passed
    Done(ChildReport),
}

/// Create both ends of the link
pub fn channel() -> Result<(ParentLink, ChildLink)> {
    let (parent, child) = UnixStream::pair().map_err(|e| TransferError::os("socketpair", e))?;
    Ok((
        ParentLink {
            stream: parent,
            released: false,
        },
        ChildLink { stream: child },
    ))
}

fn send<T: Serialize>(stream: &mut UnixStream, signal: &T) -> Result<()> {
    bincode::serialize_into(stream, signal)?;
    Ok(())
}

/// Receive one signal; `None` when the peer closed its end
fn recv<T: DeserializeOwned>(stream: &mut UnixStream) -> Result<Option<T>> {
    match bincode::deserialize_from(stream) {
        Ok(signal) => Ok(Some(signal)),
        Err(err) => {
            if let bincode::ErrorKind::Io(io) = err.as_ref() {
                if io.kind() == std::io::ErrorKind::UnexpectedEof {
                    return Ok(None);
                }
            }
            Err(err.into())
        }
    }
}

fn unexpected<T: std::fmt::Debug>(expected: &str, got: Option<T>) -> TransferError {
    match got {
        Some(signal) => {
            TransferError::Rendezvous(format!("expected {}, got {:?}", expected, signal))
        }
        None => TransferError::Rendezvous(format!(
            "peer closed link while waiting for {}",
            expected
        )),
    }
}

/// Parent end
pub struct ParentLink {
    stream: UnixStream,
    released: bool,
}

impl ParentLink {
    /// Let the child start; only the first call sends anything
    pub fn release(&mut self, checksum: u32) -> Result<bool> {
        if self.released {
            return Ok(false);
        }
        send(&mut self.stream, &ParentSignal::Release { checksum })?;
        self.released = true;
        debug!("child released");
        Ok(true)
    }

    /// Block until the child reports its reservation
    pub fn wait_ready(&mut self) -> Result<u64> {
        match recv(&mut self.stream)? {
            Some(ChildSignal::Ready { address }) => Ok(address),
            other => Err(unexpected("Ready", other)),
        }
    }

    pub fn write_done(&mut self) -> Result<()> {
        send(&mut self.stream, &ParentSignal::WriteDone)
    }

    /// Wait for the child's final report; `None` if it exited without one
    pub fn wait_done(&mut self) -> Result<Option<ChildReport>> {
        match recv(&mut self.stream)? {
            Some(ChildSignal::Done(report)) => Ok(Some(report)),
            None => Ok(None),
            other => Err(unexpected("Done", other)),
        }
    }
}

/// Child end
pub struct ChildLink {
    stream: UnixStream,
}

impl ChildLink {
    /// Block until released; returns the checksum the heap must match
    pub fn wait_release(&mut self) -> Result<u32> {
        match recv(&mut self.stream)? {
            Some(ParentSignal::Release { checksum }) => Ok(checksum),
            other => Err(unexpected("Release", other)),
        }
    }

    pub fn ready(&mut self, address: u64) -> Result<()> {
        send(&mut self.stream, &ChildSignal::Ready { address })
    }

    pub fn wait_write_done(&mut self) -> Result<()> {
        match recv(&mut self.stream)? {
            Some(ParentSignal::WriteDone) => Ok(()),
            other => Err(unexpected("WriteDone", other)),
        }
    }

    pub fn done(&mut self, report: ChildReport) -> Result<()> {
        send(&mut self.stream, &ChildSignal::Done(report))
    }
}
