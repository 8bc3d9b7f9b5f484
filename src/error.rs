//! Error taxonomy for the solver API boundary.
//!
//! Internally every fallible path returns a [`SolverError`]; the public API
//! (mirroring the original C surface) collapses that into the closed
//! [`Status`] enum so callers never have to match on a Rust-specific type to
//! decide "did this succeed".

use thiserror::Error;

/// Internal error type. Each variant maps onto exactly one [`Status`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolverError {
    #[error("invalid argument: {0}")]
    InvalidArgs(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("no backend available for the requested (backend, layout) pair")]
    NoBackend,

    #[error("unsupported relation tag or field type: {0}")]
    Unsupported(String),

    #[error("allocation failed: {0}")]
    OutOfMemory(String),
}

/// Closed status code returned at the API boundary, mirroring the original
/// C ABI's `rphys::Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    InvalidArgs,
    ValidationFailed,
    NoBackend,
    Unsupported,
    OutOfMemory,
    NotReady,
    Busy,
}

impl From<&SolverError> for Status {
    fn from(e: &SolverError) -> Self {
        match e {
            SolverError::InvalidArgs(_) => Status::InvalidArgs,
            SolverError::ValidationFailed(_) => Status::ValidationFailed,
            SolverError::NoBackend => Status::NoBackend,
            SolverError::Unsupported(_) => Status::Unsupported,
            SolverError::OutOfMemory(_) => Status::OutOfMemory,
        }
    }
}

impl From<SolverError> for Status {
    fn from(e: SolverError) -> Self {
        Status::from(&e)
    }
}

pub type SolverResult<T> = Result<T, SolverError>;
