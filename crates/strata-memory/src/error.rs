//! Error types for strata-memory.
//!
//! Allocation itself never reports failure to the caller: a system allocator
//! failure runs the arena's out-of-memory hook and aborts the process. The
//! errors below cover the fallible edges that remain — configuration
//! validation and capacity arithmetic.

use thiserror::Error;

/// Memory management errors.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: &'static str },

    #[error("invalid alignment: {alignment} is not a power of two")]
    InvalidAlignment { alignment: usize },

    #[error("size overflow during {operation}")]
    SizeOverflow { operation: &'static str },

    #[error("system allocation failed: {size} bytes with {align} byte alignment")]
    AllocationFailed { size: usize, align: usize },

    #[error("capacity overflow: requested {requested}, maximum {max}")]
    CapacityOverflow { requested: usize, max: usize },
}

impl MemoryError {
    /// Stable code for categorization in logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "MEM:CONFIG:INVALID",
            Self::InvalidAlignment { .. } => "MEM:ALLOC:ALIGN",
            Self::SizeOverflow { .. } => "MEM:ALLOC:OVERFLOW",
            Self::AllocationFailed { .. } => "MEM:ALLOC:FAILED",
            Self::CapacityOverflow { .. } => "MEM:ALLOC:MAX",
        }
    }
}

/// Convenience alias used throughout the crate.
pub type MemoryResult<T> = Result<T, MemoryError>;
