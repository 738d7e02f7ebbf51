//! # Helix Core Allocator
//!
//! A topology-aware CPU core allocator for a multi-socket, NUMA-aware
//! scheduler. Given a machine's topology (NUMA domains, sockets, CPU
//! packages, cores) and a stream of allocation requests from competing
//! processes, this crate decides which physical core each request gets,
//! favoring locality: a process's second core should sit as close as
//! possible to its first.
//!
//! ## Model
//!
//! The machine is a four-level resource tree (NUMA → socket → CPU → core)
//! held in one flat arena ([`tree`]), with a hierarchical refcount
//! discipline ([`tree::ResourceTree::incref_core`]) keeping each ancestor's
//! busy-core count in sync with its descendants. Each core carries two
//! independent ownership relations — `allocated_to` (who is running on it
//! right now) and `provisioned_to` (who has first claim on it) — and every
//! process tracks its membership in three lists threaded through the core
//! arena by index rather than by pointer ([`intrusive`]).
//!
//! ## Entry points
//!
//! [`allocator::Allocator`] is the public surface: `register_process`,
//! `alloc_any`, `alloc_specific`, `free_specific`, `provision`,
//! `deprovision`. The allocator is not internally concurrent — see the
//! module docs on [`allocator`] for the concurrency model this assumes.
//!
//! ## Errors
//!
//! Precondition violations (unknown process, unowned core, wrong
//! provisioning) return [`error::AllocError`] and make no mutation.
//! Resource exhaustion is not an error: `alloc_any` simply grants fewer
//! cores than requested. Invariant violations the allocator itself should
//! never be able to produce are checked with `debug_assert!` rather than
//! surfaced as errors.

#![no_std]
#![warn(missing_docs)]

extern crate alloc;

mod allocator;
mod distance;
mod error;
mod intrusive;
mod node;
mod process;
mod tree;

pub use allocator::Allocator;
pub use error::{AllocError, AllocResult};
pub use process::{NoopHook, ProcessId, RelocationHook};
