//! Error types for the heap transfer benchmark

use thiserror::Error;

/// Transfer error types
#[derive(Error, Debug)]
pub enum TransferError {
    /// Rejected configuration, raised before any process is forked
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failed operating-system primitive
    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A primitive reported fewer (or more) bytes than requested
    #[error("{op} moved {actual} bytes, not {expected}")]
    ShortTransfer {
        op: &'static str,
        actual: u64,
        expected: u64,
    },

    /// Checksum or sentinel mismatch after a transfer
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Asynchronous operation not yet accepted by the kernel
    #[error("Operation not yet accepted: {0}")]
    NotReady(String),

    /// Parent/child handshake broken or out of order
    #[error("Rendezvous error: {0}")]
    Rendezvous(String),

    /// Child process exited abnormally or was not the expected pid
    #[error("Child process {pid} failed: {reason}")]
    ChildFailed { pid: i32, reason: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Convenience type alias for Results
pub type Result<T> = std::result::Result<T, TransferError>;

impl TransferError {
    /// Wrap an OS error with the name of the failed primitive
    pub fn os(op: &'static str, source: impl Into<std::io::Error>) -> Self {
        TransferError::Os {
            op,
            source: source.into(),
        }
    }

    /// Capture `errno` for the named primitive
    pub fn last_os_error(op: &'static str) -> Self {
        TransferError::Os {
            op,
            source: std::io::Error::last_os_error(),
        }
    }

    /// Check if the error is recoverable
    ///
    /// Only the "not yet accepted" condition of the AIO method is retried;
    /// every other failure ends the process that observed it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransferError::NotReady(_))
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransferError::Configuration(_) => ErrorCategory::Configuration,
            TransferError::Os { .. } => ErrorCategory::Os,
            TransferError::Io(_) => ErrorCategory::Os,
            TransferError::ShortTransfer { .. } => ErrorCategory::Os,
            TransferError::Verification(_) => ErrorCategory::Verification,
            TransferError::NotReady(_) => ErrorCategory::Transient,
            TransferError::Rendezvous(_) => ErrorCategory::Protocol,
            TransferError::ChildFailed { .. } => ErrorCategory::Protocol,
            TransferError::Serialization(_) => ErrorCategory::Protocol,
        }
    }
}

/// Error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Os,
    Transient,
    Verification,
    Protocol,
}

/// Convert from common error types
impl From<bincode::Error> for TransferError {
    fn from(err: bincode::Error) -> Self {
        TransferError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for TransferError {
    fn from(err: toml::de::Error) -> Self {
        TransferError::Configuration(err.to_string())
    }
}
