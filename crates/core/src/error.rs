//! Error types for the Mosaic engine
//!
//! The taxonomy is deliberately small and maps one-to-one onto the failure
//! modes of a distributed factorization:
//!
//! - **InvalidArgument**: bad dimensions, view bounds, or option values.
//!   Surfaced at the entry point, before any work is submitted.
//! - **OutOfMemory**: a tile arena is exhausted with nothing freeable.
//! - **CommunicationFailure**: the transport failed; remote replicas are
//!   undefined and the caller must treat the matrix as invalidated.
//! - **NumericSingular**: a zero diagonal was encountered. Non-fatal — it is
//!   recorded in the diagnostics channel and the driver completes.
//! - **KernelFailure**: an underlying tile kernel returned a fatal code.
//! - **Internal**: a bug — e.g. a worker task panicked.
//!
//! Retries are not attempted anywhere in the engine; distributed retry would
//! require transactional matrix state.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the Mosaic engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad dimensions, contradictory view bounds, or out-of-range option
    /// values. Raised before any task is submitted.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the input
        message: String,
    },

    /// A tile arena could not satisfy an allocation.
    #[error("out of memory on device {device}: requested {requested} bytes, capacity {capacity}")]
    OutOfMemory {
        /// Device the arena belongs to (-1 for host)
        device: i32,
        /// Size of the failed request in bytes
        requested: usize,
        /// Arena capacity in bytes
        capacity: usize,
    },

    /// Unrecoverable transport error. Local tile origins remain coherent;
    /// remote replicas are undefined.
    #[error("communication failure: {message}")]
    CommunicationFailure {
        /// Transport-level description
        message: String,
    },

    /// A zero diagonal element was encountered during factorization.
    ///
    /// This variant exists so kernels can report the condition uniformly;
    /// the driver converts it into a diagnostics-channel event rather than
    /// failing the call.
    #[error("matrix is singular: zero diagonal in column {column}")]
    NumericSingular {
        /// Global column index of the zero diagonal
        column: usize,
    },

    /// An underlying tile kernel failed fatally.
    #[error("kernel {kernel} failed: {message}")]
    KernelFailure {
        /// Kernel name (e.g. "gemm", "trsm")
        kernel: &'static str,
        /// Kernel-reported description
        message: String,
    },

    /// Unexpected internal state — a bug in the engine.
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl Error {
    /// Create an InvalidArgument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an OutOfMemory error.
    pub fn out_of_memory(device: i32, requested: usize, capacity: usize) -> Self {
        Error::OutOfMemory {
            device,
            requested,
            capacity,
        }
    }

    /// Create a CommunicationFailure error.
    pub fn comm(message: impl Into<String>) -> Self {
        Error::CommunicationFailure {
            message: message.into(),
        }
    }

    /// Create a NumericSingular error for the given global column.
    pub fn singular(column: usize) -> Self {
        Error::NumericSingular { column }
    }

    /// Create a KernelFailure error.
    pub fn kernel(kernel: &'static str, message: impl Into<String>) -> Self {
        Error::KernelFailure {
            kernel,
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// True for errors that abort the enclosing driver call.
    ///
    /// Everything except `NumericSingular`, which is downgraded to a
    /// diagnostics event.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::NumericSingular { .. })
    }

    /// True for numeric (data-dependent) conditions.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Error::NumericSingular { .. })
    }

    /// True when the matrix must be treated as invalidated by the caller.
    pub fn invalidates_matrix(&self) -> bool {
        matches!(self, Error::CommunicationFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_invalid_argument() {
        let e = Error::invalid_argument("lookahead must be non-negative");
        assert!(e.to_string().contains("invalid argument"));
        assert!(e.to_string().contains("lookahead"));
    }

    #[test]
    fn test_display_out_of_memory() {
        let e = Error::out_of_memory(0, 4096, 1024);
        let msg = e.to_string();
        assert!(msg.contains("device 0"));
        assert!(msg.contains("4096"));
        assert!(msg.contains("1024"));
    }

    #[test]
    fn test_singular_is_not_fatal() {
        assert!(!Error::singular(3).is_fatal());
        assert!(Error::singular(3).is_numeric());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::invalid_argument("x").is_fatal());
        assert!(Error::out_of_memory(-1, 1, 0).is_fatal());
        assert!(Error::comm("peer vanished").is_fatal());
        assert!(Error::kernel("trsm", "bad ld").is_fatal());
        assert!(Error::internal("graph corrupted").is_fatal());
    }

    #[test]
    fn test_only_comm_invalidates_matrix() {
        assert!(Error::comm("x").invalidates_matrix());
        assert!(!Error::out_of_memory(-1, 1, 0).invalidates_matrix());
        assert!(!Error::singular(0).invalidates_matrix());
    }
}
