//! Result and error types shared by every component of the code generator.
//!
//! Errors are cheap, flat values; the per-function pipeline boundary is the
//! only place that aggregates them. Local recovery is reserved for a handful
//! of operations that document it (e.g. lazy runtime helper declaration).

use thiserror::Error;

/// A compilation error produced by the optimizer or the back-end.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Caller contract violation: out-of-domain argument.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// Operation not applicable to the current object state.
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    /// Internal invariant violated at runtime; indicates a bug.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Lookup in a pool returned no entry.
    #[error("not found: {0}")]
    NotFound(&'static str),

    /// Intentional limitation.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// Index past the end of a pool or bitset.
    #[error("out of bounds: {0}")]
    OutOfBounds(&'static str),

    /// Unreachable or unexpected state.
    #[error("internal error: {0}")]
    InternalError(&'static str),

    /// Allocation failed.
    #[error("memory allocation failure")]
    MemAllocFailure,

    /// Composite object creation failed.
    #[error("object allocation failure: {0}")]
    ObjAllocFailure(&'static str),

    /// External OS interaction failed.
    #[error("os error: {0}")]
    OsError(String),

    /// Compilation aborted by a diagnostic pass; carries the report.
    #[error("interrupted: {0}")]
    Interrupt(String),

    /// A constant expression evaluator hit a non-constant subexpression.
    #[error("not a constant expression")]
    NotConstant,

    /// Internal traversal control; never surfaced to callers.
    #[error("traversal yield")]
    Yield,
}

/// Result alias used across the crate.
pub type Result<T> = core::result::Result<T, Error>;
