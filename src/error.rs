//! Error types for sparse-coord

use crate::coordinate::CoordinateMapKey;
use thiserror::Error;

/// Result type alias using sparse-coord's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in coordinate map operations
///
/// A lookup that finds nothing is not an error: `find` reports misses as
/// `None` and `find_batch` drops them. Every variant here aborts only the
/// offending call; maps created before it stay valid.
#[derive(Error, Debug)]
pub enum Error {
    /// Coordinate dimensionality must be positive
    #[error("Invalid rank: spatial dimension must be > 0, got {dimension}")]
    InvalidRank {
        /// The rejected dimension
        dimension: usize,
    },

    /// Insertion under a key that already holds a map
    #[error("Coordinate map {key} already exists")]
    DuplicateKey {
        /// The existing key
        key: CoordinateMapKey,
    },

    /// Query referencing a key the manager never created
    #[error("Coordinate map {key} does not exist")]
    UnknownKey {
        /// The missing key
        key: CoordinateMapKey,
    },

    /// Kernel size, dilation or offset list is malformed
    #[error("Invalid stencil: {reason}")]
    InvalidStencil {
        /// Reason for invalidity
        reason: String,
    },

    /// Backend could not obtain the requested memory
    #[error("Allocation failure: could not allocate {size} bytes")]
    AllocationFailure {
        /// Requested size in bytes
        size: usize,
    },

    /// Device backend requested but not present in this process
    #[error("Backend '{backend}' is not available")]
    BackendUnavailable {
        /// The requested backend
        backend: &'static str,
    },

    /// Invalid argument provided to an operation
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a stencil error
    pub fn invalid_stencil(reason: impl Into<String>) -> Self {
        Self::InvalidStencil {
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(arg: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            arg,
            reason: reason.into(),
        }
    }

    /// Create an allocation failure for `count` elements of `T`
    pub fn allocation_failure<T>(count: usize) -> Self {
        Self::AllocationFailure {
            size: count.saturating_mul(std::mem::size_of::<T>()),
        }
    }
}
