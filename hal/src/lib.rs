//! # Helix HAL — Topology Descriptors
//!
//! This crate carries the hardware topology descriptor types consumed by
//! the Helix core allocator ([`helix_core`]). Topology *discovery* — probing
//! CPUID, ACPI tables, or a device tree to learn how many NUMA domains,
//! sockets, CPUs, and cores a machine has — is the job of a platform layer
//! that sits below this crate. All `helix-hal` does is describe the result
//! of that discovery in a form the allocator can build a resource tree from.
//!
//! The descriptor types here are deliberately plain data: no discovery
//! logic, no architecture-specific code. A platform layer (or a test)
//! constructs a [`topology::TopologyInfo`] and hands it to
//! `helix_core::Allocator::new`.

#![no_std]

extern crate alloc;

pub mod topology;

pub use topology::{CoreInfo, TopologyError, TopologyInfo};
