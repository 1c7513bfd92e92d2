use std::collections::TryReserveError;

use thiserror::Error;

/// Errors returned by the clustering kernels and the distributed steps.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid parameter value.
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Human-readable explanation.
        message: &'static str,
    },

    /// Points or blocks have inconsistent dimensionality.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimensionality.
        expected: usize,
        /// Found dimensionality.
        found: usize,
    },

    /// An observation weight is negative or not finite.
    #[error("invalid weight for observation {index}")]
    InvalidWeight {
        /// Row of the offending weight.
        index: usize,
    },

    /// A growable container or output buffer could not be allocated.
    #[error("allocation failed for {what} ({requested} additional entries)")]
    AllocationFailed {
        /// Which buffer was growing.
        what: &'static str,
        /// Number of entries requested on top of the current length.
        requested: usize,
    },

    /// Step inputs disagree with each other or with the block layout.
    #[error("inconsistent input to {step}: {message}")]
    Inconsistent {
        /// Step that rejected its input.
        step: &'static str,
        /// Human-readable explanation.
        message: String,
    },

    /// An array could not be built with the requested shape.
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    /// A convergence loop hit the caller's round limit.
    #[error("{loop_name} loop did not converge within {rounds} rounds")]
    NotConverged {
        /// Which loop was cut off.
        loop_name: &'static str,
        /// Rounds executed before giving up.
        rounds: usize,
    },
}

impl Error {
    pub(crate) fn allocation(
        what: &'static str,
        requested: usize,
    ) -> impl FnOnce(TryReserveError) -> Self {
        move |_| Error::AllocationFailed { what, requested }
    }

    pub(crate) fn inconsistent(step: &'static str, message: impl Into<String>) -> Self {
        Error::Inconsistent {
            step,
            message: message.into(),
        }
    }
}

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;
