//! Process-side state: per-process core membership and physical core data.

use crate::intrusive::{CoreList, ListLink};
use helix_hal::CoreInfo;

/// Opaque handle to a process, supplied by the collaborator that owns
/// process lifecycle. The allocator never constructs these itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

/// Per-core bookkeeping: who it's allocated to, who it's provisioned to
/// (independently of allocation — see [`crate::allocator`]), and the two
/// link fields used to thread it through its owner's intrusive lists.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PhysicalCore {
    pub core_info: CoreInfo,
    pub allocated_to: Option<ProcessId>,
    pub provisioned_to: Option<ProcessId>,
    pub alloc_link: ListLink,
    pub prov_link: ListLink,
}

/// A process's view of its cores: the set it currently holds, and the two
/// disjoint halves of what it has provisioned (held vs. not currently held).
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ProcessState {
    /// Cores currently allocated to this process.
    pub alloc_me: CoreList,
    /// Cores provisioned to this process that it currently also holds.
    pub prov_alloc_me: CoreList,
    /// Cores provisioned to this process that it does not currently hold.
    pub prov_not_alloc_me: CoreList,
}

/// Outbound callback fired when a core is taken from a process that held it
/// because another process's provisioning grant takes priority (see
/// `alloc_core` in [`crate::allocator`]). The collaborator is expected to
/// arrange for the dispossessed process to stop running on that core before
/// this returns; the allocator does not suspend execution itself.
pub trait RelocationHook {
    /// Called after `owner` has lost `core_id` but before a replacement core
    /// has been found for it.
    fn on_relocated(&self, owner: ProcessId, core_id: u32);
}

/// A [`RelocationHook`] that does nothing, for callers that don't need the
/// notification (tests, or a collaborator that polls ownership instead).
#[derive(Debug, Default)]
pub struct NoopHook;

impl RelocationHook for NoopHook {
    fn on_relocated(&self, _owner: ProcessId, _core_id: u32) {}
}
