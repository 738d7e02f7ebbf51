//! Public entry points: `alloc_any`, `alloc_specific`, `free_specific`,
//! `provision`, `deprovision`, plus process registration and read-only
//! introspection.
//!
//! The allocator is not internally concurrent — callers are expected to hold
//! a single external lock around the whole subsystem, matching the
//! concurrency model of the scheduler this is descended from. Internally,
//! state lives behind one [`spin::Mutex`], the same pattern
//! `KernelOrchestrator` and `ResourceBroker` use elsewhere in this codebase,
//! so the type is `Send + Sync` without asking callers to reason about
//! finer-grained locking that the algorithms below don't actually need.

use crate::error::{AllocError, AllocResult};
use crate::intrusive::{self, AllocLink, ProvLink};
use crate::process::{ProcessId, ProcessState, RelocationHook};
use crate::tree::ResourceTree;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use helix_hal::TopologyInfo;
use spin::Mutex;

struct AllocatorState {
    tree: ResourceTree,
    processes: BTreeMap<ProcessId, ProcessState>,
}

impl AllocatorState {
    fn validate_core_id(&self, core_id: u32) -> AllocResult<()> {
        if core_id >= self.tree.num_cores() {
            Err(AllocError::CoreOutOfRange)
        } else {
            Ok(())
        }
    }

    /// Grants `p` up to `amount` additional cores, one at a time, stopping
    /// early (without error) if the machine runs out of cores to give it.
    /// Returns the number actually granted.
    fn alloc_any(&mut self, pid: ProcessId, amount: usize, hook: &dyn RelocationHook) -> AllocResult<usize> {
        if !self.processes.contains_key(&pid) {
            return Err(AllocError::UnknownProcess);
        }
        let mut granted = 0;
        for _ in 0..amount {
            let chosen = {
                let proc = &self.processes[&pid];
                if proc.alloc_me.len == 0 {
                    self.tree.find_first_core(proc)
                } else {
                    self.tree.find_best_core(proc)
                }
            };
            let Some(core_id) = chosen else { break };
            self.alloc_core(pid, core_id, hook);
            let proc = self.processes.get_mut(&pid).expect("checked above");
            intrusive::push_back::<AllocLink>(&mut self.tree.cores, &mut proc.alloc_me, core_id);
            granted += 1;
        }
        Ok(granted)
    }

    fn alloc_specific(&mut self, pid: ProcessId, core_id: u32, hook: &dyn RelocationHook) -> AllocResult<()> {
        self.validate_core_id(core_id)?;
        if !self.processes.contains_key(&pid) {
            return Err(AllocError::UnknownProcess);
        }
        if self.tree.cores[core_id as usize].provisioned_to != Some(pid) {
            return Err(AllocError::NotProvisionedToProcess);
        }
        if self.tree.cores[core_id as usize].allocated_to == Some(pid) {
            return Ok(());
        }
        self.alloc_core(pid, core_id, hook);
        let proc = self.processes.get_mut(&pid).expect("checked above");
        intrusive::push_back::<AllocLink>(&mut self.tree.cores, &mut proc.alloc_me, core_id);
        Ok(())
    }

    /// The allocation primitive shared by `alloc_any` and `alloc_specific`:
    /// incref the core, and if it's provisioned to `p`, move it from `p`'s
    /// not-held provisioning list to its held one. If someone else currently
    /// holds the core, strip it from them, notify the relocation hook, and
    /// recursively grant them a replacement — all before handing `c` to `p`.
    /// Does not touch `p.alloc_me`; the caller appends to that list itself,
    /// since `alloc_any` and `alloc_specific` both need to do it identically
    /// regardless of which path through this function was taken.
    fn alloc_core(&mut self, pid: ProcessId, core_id: u32, hook: &dyn RelocationHook) {
        let owner = self.tree.cores[core_id as usize].allocated_to;
        self.tree.incref_core(core_id);

        if self.tree.cores[core_id as usize].provisioned_to == Some(pid) {
            let proc = self.processes.get_mut(&pid).expect("process must be registered");
            intrusive::remove::<ProvLink>(&mut self.tree.cores, &mut proc.prov_not_alloc_me, core_id);
            intrusive::push_back::<ProvLink>(&mut self.tree.cores, &mut proc.prov_alloc_me, core_id);

            if let Some(owner_pid) = owner {
                debug_assert_ne!(owner_pid, pid, "alloc_core invoked on a core p already owns");
                if let Some(owner_proc) = self.processes.get_mut(&owner_pid) {
                    intrusive::remove::<AllocLink>(&mut self.tree.cores, &mut owner_proc.alloc_me, core_id);
                }
                hook.on_relocated(owner_pid, core_id);
                let _ = self.alloc_any(owner_pid, 1, hook);
            }
        }

        self.tree.cores[core_id as usize].allocated_to = Some(pid);
    }

    fn free_specific(&mut self, pid: ProcessId, core_id: u32) -> AllocResult<()> {
        self.validate_core_id(core_id)?;
        if self.tree.cores[core_id as usize].allocated_to != Some(pid) {
            return Err(AllocError::NotOwnedByProcess);
        }
        self.tree.cores[core_id as usize].allocated_to = None;
        let proc = self.processes.get_mut(&pid).expect("ownership check implies registration");
        intrusive::remove::<AllocLink>(&mut self.tree.cores, &mut proc.alloc_me, core_id);
        if self.tree.cores[core_id as usize].provisioned_to == Some(pid) {
            intrusive::remove::<ProvLink>(&mut self.tree.cores, &mut proc.prov_alloc_me, core_id);
            intrusive::push_back::<ProvLink>(&mut self.tree.cores, &mut proc.prov_not_alloc_me, core_id);
        }
        self.tree.decref_core(core_id);
        Ok(())
    }

    fn provision(&mut self, pid: ProcessId, core_id: u32) -> AllocResult<()> {
        self.validate_core_id(core_id)?;
        if !self.processes.contains_key(&pid) {
            return Err(AllocError::UnknownProcess);
        }
        match self.tree.cores[core_id as usize].provisioned_to {
            Some(prev) if prev == pid => return Ok(()),
            Some(prev) => self.deprovision_unchecked(prev, core_id),
            None => {}
        }

        self.tree.cores[core_id as usize].provisioned_to = Some(pid);
        let held_by_p = self.tree.cores[core_id as usize].allocated_to == Some(pid);
        let proc = self.processes.get_mut(&pid).expect("checked above");
        if held_by_p {
            intrusive::push_back::<ProvLink>(&mut self.tree.cores, &mut proc.prov_alloc_me, core_id);
        } else {
            intrusive::push_back::<ProvLink>(&mut self.tree.cores, &mut proc.prov_not_alloc_me, core_id);
        }
        Ok(())
    }

    fn deprovision(&mut self, pid: ProcessId, core_id: u32) -> AllocResult<()> {
        self.validate_core_id(core_id)?;
        if self.tree.cores[core_id as usize].provisioned_to != Some(pid) {
            return Err(AllocError::NotProvisionedToProcess);
        }
        self.deprovision_unchecked(pid, core_id);
        Ok(())
    }

    fn deprovision_unchecked(&mut self, pid: ProcessId, core_id: u32) {
        let held_by_pid = self.tree.cores[core_id as usize].allocated_to == Some(pid);
        if let Some(proc) = self.processes.get_mut(&pid) {
            if held_by_pid {
                intrusive::remove::<ProvLink>(&mut self.tree.cores, &mut proc.prov_alloc_me, core_id);
            } else {
                intrusive::remove::<ProvLink>(&mut self.tree.cores, &mut proc.prov_not_alloc_me, core_id);
            }
        }
        self.tree.cores[core_id as usize].provisioned_to = None;
    }
}

/// The topology-aware CPU core allocator.
///
/// Construct one from a validated [`TopologyInfo`], register the processes
/// that will compete for cores, and drive allocation through `alloc_any`,
/// `alloc_specific`, `free_specific`, `provision`, and `deprovision`.
pub struct Allocator {
    hook: Arc<dyn RelocationHook + Send + Sync>,
    state: Mutex<AllocatorState>,
}

impl Allocator {
    /// Builds an allocator with a no-op relocation hook.
    pub fn new(topology: &TopologyInfo) -> AllocResult<Self> {
        Self::with_hook(topology, Arc::new(crate::process::NoopHook))
    }

    /// Builds an allocator that notifies `hook` whenever a provisioning grant
    /// displaces a process from a core it held.
    pub fn with_hook(topology: &TopologyInfo, hook: Arc<dyn RelocationHook + Send + Sync>) -> AllocResult<Self> {
        topology.validate().map_err(|_| AllocError::InvalidTopology)?;
        let tree = ResourceTree::build(topology);
        Ok(Self { hook, state: Mutex::new(AllocatorState { tree, processes: BTreeMap::new() }) })
    }

    /// Registers a process so it can participate in allocation. Must be
    /// called before any other operation mentions `pid`.
    pub fn register_process(&self, pid: ProcessId) -> AllocResult<()> {
        let mut state = self.state.lock();
        if state.processes.contains_key(&pid) {
            return Err(AllocError::AlreadyRegistered);
        }
        state.processes.insert(pid, ProcessState::default());
        Ok(())
    }

    /// Grants `pid` up to `amount` additional cores. Returns the number
    /// actually granted, which is less than `amount` if the machine ran out.
    pub fn alloc_any(&self, pid: ProcessId, amount: usize) -> AllocResult<usize> {
        self.state.lock().alloc_any(pid, amount, self.hook.as_ref())
    }

    /// Grants `pid` the specific core `core_id`, which must already be
    /// provisioned to it.
    pub fn alloc_specific(&self, pid: ProcessId, core_id: u32) -> AllocResult<()> {
        self.state.lock().alloc_specific(pid, core_id, self.hook.as_ref())
    }

    /// Releases `core_id` from `pid`, which must currently hold it.
    pub fn free_specific(&self, pid: ProcessId, core_id: u32) -> AllocResult<()> {
        self.state.lock().free_specific(pid, core_id)
    }

    /// Provisions `core_id` to `pid`, displacing any prior provisioning.
    pub fn provision(&self, pid: ProcessId, core_id: u32) -> AllocResult<()> {
        self.state.lock().provision(pid, core_id)
    }

    /// Removes `pid`'s provisioning claim on `core_id`.
    pub fn deprovision(&self, pid: ProcessId, core_id: u32) -> AllocResult<()> {
        self.state.lock().deprovision(pid, core_id)
    }

    /// The set of cores currently allocated to `pid`, in allocation order.
    pub fn alloc_me(&self, pid: ProcessId) -> AllocResult<alloc::vec::Vec<u32>> {
        let state = self.state.lock();
        let proc = state.processes.get(&pid).ok_or(AllocError::UnknownProcess)?;
        Ok(intrusive::iter::<AllocLink>(&state.tree.cores, &proc.alloc_me).collect())
    }

    /// The process `core_id` is currently allocated to, if any.
    pub fn allocated_to(&self, core_id: u32) -> AllocResult<Option<ProcessId>> {
        let state = self.state.lock();
        state.validate_core_id(core_id)?;
        Ok(state.tree.cores[core_id as usize].allocated_to)
    }

    /// The process `core_id` is currently provisioned to, if any.
    pub fn provisioned_to(&self, core_id: u32) -> AllocResult<Option<ProcessId>> {
        let state = self.state.lock();
        state.validate_core_id(core_id)?;
        Ok(state.tree.cores[core_id as usize].provisioned_to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_hal::TopologyInfo;

    fn topo_1x2x2x2() -> TopologyInfo {
        TopologyInfo::uniform(1, 2, 2, 2)
    }

    fn new_alloc(topo: &TopologyInfo) -> Allocator {
        let a = Allocator::new(topo).unwrap();
        a.register_process(ProcessId(1)).unwrap();
        a.register_process(ProcessId(2)).unwrap();
        a
    }

    #[test]
    fn scenario_a_first_touch_spreads_across_sockets() {
        let topo = topo_1x2x2x2();
        let a = new_alloc(&topo);
        assert_eq!(a.alloc_any(ProcessId(1), 1).unwrap(), 1);
        assert_eq!(a.alloc_me(ProcessId(1)).unwrap(), alloc::vec![0]);
        assert_eq!(a.alloc_any(ProcessId(2), 1).unwrap(), 1);
        assert_eq!(a.alloc_me(ProcessId(2)).unwrap(), alloc::vec![4]);
    }

    #[test]
    fn scenario_b_growth_packs_tightly_around_held_cores() {
        let topo = topo_1x2x2x2();
        let a = new_alloc(&topo);
        a.alloc_any(ProcessId(1), 1).unwrap();
        a.alloc_any(ProcessId(1), 1).unwrap();
        assert_eq!(a.alloc_me(ProcessId(1)).unwrap(), alloc::vec![0, 1]);
        a.alloc_any(ProcessId(1), 1).unwrap();
        assert_eq!(a.alloc_me(ProcessId(1)).unwrap(), alloc::vec![0, 1, 2]);
    }

    #[test]
    fn scenario_c_provisioning_is_honored_on_first_touch() {
        let topo = topo_1x2x2x2();
        let a = new_alloc(&topo);
        a.provision(ProcessId(1), 7).unwrap();
        assert_eq!(a.alloc_any(ProcessId(1), 1).unwrap(), 1);
        assert_eq!(a.alloc_me(ProcessId(1)).unwrap(), alloc::vec![7]);
    }

    #[test]
    fn scenario_d_reprovisioning_displaces_and_relocates_owner() {
        let topo = topo_1x2x2x2();
        let a = new_alloc(&topo);
        a.alloc_any(ProcessId(1), 1).unwrap();
        assert_eq!(a.alloc_me(ProcessId(1)).unwrap(), alloc::vec![0]);

        a.provision(ProcessId(2), 0).unwrap();
        a.alloc_specific(ProcessId(2), 0).unwrap();

        assert_eq!(a.allocated_to(0).unwrap(), Some(ProcessId(2)));
        let p1_cores = a.alloc_me(ProcessId(1)).unwrap();
        assert_eq!(p1_cores.len(), 1);
        assert_ne!(p1_cores[0], 0);
    }

    #[test]
    fn scenario_e_free_then_realloc_prefers_freed_sibling() {
        let topo = topo_1x2x2x2();
        let a = new_alloc(&topo);
        a.alloc_any(ProcessId(1), 2).unwrap();
        assert_eq!(a.alloc_me(ProcessId(1)).unwrap(), alloc::vec![0, 1]);
        a.free_specific(ProcessId(1), 0).unwrap();
        assert_eq!(a.alloc_me(ProcessId(1)).unwrap(), alloc::vec![1]);
        a.alloc_any(ProcessId(1), 1).unwrap();
        assert_eq!(a.alloc_me(ProcessId(1)).unwrap(), alloc::vec![1, 0]);
    }

    #[test]
    fn scenario_f_exhaustion_grants_fewer_than_requested() {
        let topo = topo_1x2x2x2();
        let a = new_alloc(&topo);
        let granted = a.alloc_any(ProcessId(1), 10).unwrap();
        assert_eq!(granted, topo.num_cores as usize);
        assert_eq!(a.alloc_any(ProcessId(2), 1).unwrap(), 0);
        assert!(a.alloc_me(ProcessId(2)).unwrap().is_empty());
    }

    #[test]
    fn free_specific_on_unowned_core_is_rejected_without_mutation() {
        let topo = topo_1x2x2x2();
        let a = new_alloc(&topo);
        a.alloc_any(ProcessId(1), 1).unwrap();
        let before = a.alloc_me(ProcessId(1)).unwrap();
        assert_eq!(a.free_specific(ProcessId(2), 0), Err(AllocError::NotOwnedByProcess));
        assert_eq!(a.alloc_me(ProcessId(1)).unwrap(), before);
    }

    #[test]
    fn alloc_specific_requires_provisioning() {
        let topo = topo_1x2x2x2();
        let a = new_alloc(&topo);
        assert_eq!(
            a.alloc_specific(ProcessId(1), 3),
            Err(AllocError::NotProvisionedToProcess)
        );
    }

    #[test]
    fn alloc_specific_on_already_held_core_is_a_noop() {
        let topo = topo_1x2x2x2();
        let a = new_alloc(&topo);
        a.provision(ProcessId(1), 3).unwrap();
        a.alloc_specific(ProcessId(1), 3).unwrap();
        assert_eq!(a.alloc_me(ProcessId(1)).unwrap(), alloc::vec![3]);

        a.alloc_specific(ProcessId(1), 3).unwrap();
        assert_eq!(a.alloc_me(ProcessId(1)).unwrap(), alloc::vec![3]);
        assert_eq!(a.allocated_to(3).unwrap(), Some(ProcessId(1)));
        assert_eq!(a.provisioned_to(3).unwrap(), Some(ProcessId(1)));
    }

    #[test]
    fn unknown_process_is_rejected() {
        let topo = topo_1x2x2x2();
        let a = Allocator::new(&topo).unwrap();
        assert_eq!(a.alloc_any(ProcessId(99), 1), Err(AllocError::UnknownProcess));
    }

    #[test]
    fn relocation_hook_fires_on_displacement() {
        use core::sync::atomic::{AtomicU32, Ordering};

        #[derive(Default)]
        struct CountingHook(AtomicU32);
        impl RelocationHook for CountingHook {
            fn on_relocated(&self, _owner: ProcessId, _core_id: u32) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let topo = topo_1x2x2x2();
        let hook = Arc::new(CountingHook::default());
        let a = Allocator::with_hook(&topo, hook.clone()).unwrap();
        a.register_process(ProcessId(1)).unwrap();
        a.register_process(ProcessId(2)).unwrap();

        a.alloc_any(ProcessId(1), 1).unwrap();
        a.provision(ProcessId(2), 0).unwrap();
        a.alloc_specific(ProcessId(2), 0).unwrap();

        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
    }
}
