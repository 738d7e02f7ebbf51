//! Error type for the allocator's public entry points.
//!
//! Precondition violations (unknown process, out-of-range core, wrong
//! ownership) are recoverable: the call makes no mutation and returns an
//! error the caller can act on. They are distinct from internal invariant
//! violations, which this crate treats as bugs and surfaces via
//! `debug_assert!`/`panic!` rather than `AllocError` — see the module docs
//! on [`crate::tree`] for where those checks live.

use core::fmt;

/// Result type returned by the allocator's public API.
pub type AllocResult<T> = Result<T, AllocError>;

/// Precondition violation reported by the allocator's public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The topology descriptor failed validation.
    InvalidTopology,
    /// No process is registered under this id.
    UnknownProcess,
    /// A process is already registered under this id.
    AlreadyRegistered,
    /// The core id is outside `0..num_cores`.
    CoreOutOfRange,
    /// `free_specific` was called for a core the process doesn't own.
    NotOwnedByProcess,
    /// `alloc_specific` was called for a core not provisioned to the process.
    NotProvisionedToProcess,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::InvalidTopology => "topology descriptor failed validation",
            Self::UnknownProcess => "no process registered under this id",
            Self::AlreadyRegistered => "process id already registered",
            Self::CoreOutOfRange => "core id out of range",
            Self::NotOwnedByProcess => "core is not allocated to this process",
            Self::NotProvisionedToProcess => "core is not provisioned to this process",
        };
        f.write_str(msg)
    }
}
