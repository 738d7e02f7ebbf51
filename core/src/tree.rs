//! The resource tree: a flat, index-linked arena mirroring the four-level
//! hierarchy (NUMA, socket, CPU, core), plus the refcount discipline and
//! search algorithms that operate over it.
//!
//! Only `refcount[Core]` is ever populated on non-core nodes. The hierarchy
//! supports allocating at any level (the scheduler this is descended from
//! could hand out a whole socket at once), but this allocator's public API
//! only ever grants individual cores, so the other `refcount[L]` slots stay
//! at zero and the sum invariant holds on them trivially.

use crate::intrusive::{self, AllocLink, ProvLink};
use crate::node::{Node, NodeLevel};
use crate::process::{PhysicalCore, ProcessState};
use alloc::vec::Vec;
use core::ops::Range;
use helix_hal::TopologyInfo;

use crate::distance::DistanceTable;

pub(crate) struct ResourceTree {
    nodes: Vec<Node>,
    level_offset: [u32; NodeLevel::COUNT],
    level_count: [u32; NodeLevel::COUNT],
    /// Number of cores under one node at each level (1 for Core itself).
    core_span: [u32; NodeLevel::COUNT],
    pub(crate) cores: Vec<PhysicalCore>,
    distances: DistanceTable,
}

impl ResourceTree {
    /// Builds the arena from a validated topology descriptor. Mirrors
    /// `nodes_init`/`init_nodes` in the scheduler this is descended from:
    /// size the arena to the per-level counts, lay out each level
    /// contiguously, and link parent/child by computed offset rather than
    /// by walking a free-form tree.
    pub(crate) fn build(topology: &TopologyInfo) -> Self {
        let level_count = [
            topology.num_cores,
            topology.num_cpus,
            topology.num_sockets,
            topology.num_numa,
        ];
        // children_per_parent[L] = how many children a node at level L has.
        let children_per_parent = [
            0,
            topology.cores_per_cpu,
            topology.cpus_per_socket,
            topology.sockets_per_numa,
        ];

        let mut level_offset = [0u32; NodeLevel::COUNT];
        for l in 1..NodeLevel::COUNT {
            level_offset[l] = level_offset[l - 1] + level_count[l - 1];
        }

        let total: u32 = level_count.iter().sum();
        let mut nodes = Vec::with_capacity(total as usize);
        for (level_idx, &level) in NodeLevel::ALL.iter().enumerate() {
            let nchildren = children_per_parent[level_idx];
            for id in 0..level_count[level_idx] {
                let (children_start, children_len) = if level == NodeLevel::Core {
                    (0, 0)
                } else {
                    let child_level_idx = level_idx - 1;
                    (level_offset[child_level_idx] + id * nchildren, nchildren)
                };
                nodes.push(Node {
                    level,
                    id,
                    parent: None,
                    children_start,
                    children_len,
                    refcount: [0; NodeLevel::COUNT],
                });
            }
        }

        for level_idx in 0..NodeLevel::COUNT - 1 {
            let nchildren = children_per_parent[level_idx + 1];
            for parent_id in 0..level_count[level_idx + 1] {
                let start = level_offset[level_idx] + parent_id * nchildren;
                for k in 0..nchildren {
                    nodes[(start + k) as usize].parent = Some(level_offset[level_idx + 1] + parent_id);
                }
            }
        }

        let mut core_span = [0u32; NodeLevel::COUNT];
        core_span[NodeLevel::Core as usize] = 1;
        core_span[NodeLevel::Cpu as usize] = children_per_parent[NodeLevel::Cpu as usize];
        core_span[NodeLevel::Socket as usize] =
            core_span[NodeLevel::Cpu as usize] * children_per_parent[NodeLevel::Socket as usize];
        core_span[NodeLevel::Numa as usize] =
            core_span[NodeLevel::Socket as usize] * children_per_parent[NodeLevel::Numa as usize];

        let cores = topology
            .core_list
            .iter()
            .map(|info| PhysicalCore {
                core_info: *info,
                allocated_to: None,
                provisioned_to: None,
                alloc_link: Default::default(),
                prov_link: Default::default(),
            })
            .collect();

        let distances = DistanceTable::build(&topology.core_list);

        Self { nodes, level_offset, level_count, core_span, cores, distances }
    }

    fn core_node_index(&self, core_id: u32) -> u32 {
        self.level_offset[NodeLevel::Core as usize] + core_id
    }

    /// All core ids under the node at `idx`, as a contiguous range. Valid
    /// because the tree is perfectly regular: a level-L node's id times the
    /// number of cores under one such node gives the start of its range.
    fn core_range_under(&self, idx: u32) -> Range<u32> {
        let node = &self.nodes[idx as usize];
        let span = self.core_span[node.level as usize];
        let start = node.id * span;
        start..(start + span)
    }

    fn ancestor_at(&self, mut idx: u32, level: NodeLevel) -> u32 {
        while self.nodes[idx as usize].level != level {
            idx = self.nodes[idx as usize]
                .parent
                .expect("every level below Numa has a parent");
        }
        idx
    }

    /// Increments `refcount[Core]` on a core and every ancestor, but only if
    /// the core was previously free. Called unconditionally by `alloc_core`
    /// even on ownership transfer (the core stays in the same place in the
    /// tree, so a transfer leaves every ancestor's count untouched — it was
    /// already counted busy).
    pub(crate) fn incref_core(&mut self, core_id: u32) {
        let mut idx = self.core_node_index(core_id);
        if self.nodes[idx as usize].refcount[NodeLevel::Core as usize] != 0 {
            return;
        }
        loop {
            self.nodes[idx as usize].refcount[NodeLevel::Core as usize] += 1;
            match self.nodes[idx as usize].parent {
                Some(p) => idx = p,
                None => break,
            }
        }
    }

    /// Decrements `refcount[Core]` on a core and every ancestor. Only called
    /// when a core is being fully freed, never on a transfer, so it's always
    /// unconditional.
    pub(crate) fn decref_core(&mut self, core_id: u32) {
        let mut idx = self.core_node_index(core_id);
        loop {
            debug_assert!(
                self.nodes[idx as usize].refcount[NodeLevel::Core as usize] > 0,
                "decref on a node with refcount already zero"
            );
            self.nodes[idx as usize].refcount[NodeLevel::Core as usize] -= 1;
            match self.nodes[idx as usize].parent {
                Some(p) => idx = p,
                None => break,
            }
        }
    }

    fn distance_sum(&self, core_id: u32, proc: &ProcessState) -> u32 {
        intrusive::iter::<AllocLink>(&self.cores, &proc.alloc_me)
            .map(|s| self.distances.get(core_id, s))
            .sum()
    }

    /// Phase A of `find_best_core`: the best free core among `p`'s
    /// provisioned-but-not-held cores, by minimum total distance to what `p`
    /// already holds. Ties favor whichever was encountered first walking the
    /// list (i.e. provisioned earliest).
    fn find_best_core_phase_a(&self, proc: &ProcessState) -> Option<u32> {
        let mut best: Option<(u32, u32)> = None;
        for core_id in intrusive::iter::<ProvLink>(&self.cores, &proc.prov_not_alloc_me) {
            if self.cores[core_id as usize].allocated_to.is_some() {
                continue;
            }
            let d = self.distance_sum(core_id, proc);
            let better = match best {
                None => true,
                Some((_, best_d)) => d < best_d,
            };
            if better {
                best = Some((core_id, d));
            }
        }
        best.map(|(core_id, _)| core_id)
    }

    /// Phase B of `find_best_core`: widen outward from `p`'s held cores one
    /// level at a time (CPU, then socket, then NUMA domain), and within the
    /// first level that has a free sibling, pick the one with the lowest
    /// total distance to `p`'s held cores. Ties favor a core nobody has
    /// provisioned over one provisioned to some other process.
    fn find_best_core_phase_b(&self, proc: &ProcessState) -> Option<u32> {
        for level in [NodeLevel::Cpu, NodeLevel::Socket, NodeLevel::Numa] {
            let mut seen_ancestors: Vec<u32> = Vec::new();
            let mut best: Option<(u32, u32, bool)> = None; // (core, distance, unprovisioned)

            for s in intrusive::iter::<AllocLink>(&self.cores, &proc.alloc_me) {
                let anc = self.ancestor_at(self.core_node_index(s), level);
                if seen_ancestors.contains(&anc) {
                    continue;
                }
                seen_ancestors.push(anc);

                for c in self.core_range_under(anc) {
                    if self.cores[c as usize].allocated_to.is_some() {
                        continue;
                    }
                    let d = self.distance_sum(c, proc);
                    let unprovisioned = self.cores[c as usize].provisioned_to.is_none();
                    let better = match best {
                        None => true,
                        Some((_, best_d, best_unprov)) => {
                            d < best_d || (d == best_d && unprovisioned && !best_unprov)
                        }
                    };
                    if better {
                        best = Some((c, d, unprovisioned));
                    }
                }
            }

            if let Some((core_id, _, _)) = best {
                return Some(core_id);
            }
        }
        None
    }

    /// Best core to grant `p` next, given it already holds at least one.
    pub(crate) fn find_best_core(&self, proc: &ProcessState) -> Option<u32> {
        self.find_best_core_phase_a(proc).or_else(|| self.find_best_core_phase_b(proc))
    }

    /// First core ever granted to `p`, who holds nothing yet. If `p` has a
    /// provisioned-but-not-held core, it always wins (no freeness check —
    /// `alloc_core` will happily displace whoever holds it, since a
    /// provisioning grant takes priority). Otherwise, walk the hierarchy
    /// top-down, at each level choosing the sibling with the lowest
    /// `refcount[Core]` that still has room, and at the core level return
    /// the first descendant that's entirely free.
    pub(crate) fn find_first_core(&self, proc: &ProcessState) -> Option<u32> {
        if let Some(head) = proc.prov_not_alloc_me.head {
            return Some(head);
        }

        let mut siblings: Vec<u32> = (0..self.level_count[NodeLevel::Numa as usize])
            .map(|id| self.level_offset[NodeLevel::Numa as usize] + id)
            .collect();
        let mut level = NodeLevel::Numa;

        loop {
            if level == NodeLevel::Core {
                return siblings
                    .into_iter()
                    .find(|&idx| self.nodes[idx as usize].refcount[NodeLevel::Core as usize] == 0)
                    .map(|idx| self.nodes[idx as usize].id);
            }

            let capacity = self.core_span[level as usize];
            let best = siblings
                .iter()
                .copied()
                .filter(|&idx| self.nodes[idx as usize].refcount[NodeLevel::Core as usize] < capacity)
                .min_by_key(|&idx| self.nodes[idx as usize].refcount[NodeLevel::Core as usize]);

            let Some(best_idx) = best else { return None };
            let node = &self.nodes[best_idx as usize];
            siblings = (node.children_start..node.children_start + node.children_len).collect();
            level = level.child_level().expect("level above Core always has a child level");
        }
    }

    pub(crate) fn num_cores(&self) -> u32 {
        self.cores.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessState;
    use helix_hal::TopologyInfo;

    fn tree_for(topo: &TopologyInfo) -> ResourceTree {
        ResourceTree::build(topo)
    }

    #[test]
    fn refcount_sums_to_root() {
        let topo = TopologyInfo::uniform(1, 2, 2, 2);
        let mut tree = tree_for(&topo);
        tree.incref_core(0);
        tree.incref_core(3);
        let numa_idx = tree.level_offset[NodeLevel::Numa as usize];
        assert_eq!(tree.nodes[numa_idx as usize].refcount[NodeLevel::Core as usize], 2);
    }

    #[test]
    fn incref_on_already_busy_core_is_noop() {
        let topo = TopologyInfo::uniform(1, 2, 2, 2);
        let mut tree = tree_for(&topo);
        tree.incref_core(0);
        let before = tree.nodes.clone();
        tree.incref_core(0);
        for (a, b) in before.iter().zip(tree.nodes.iter()) {
            assert_eq!(a.refcount, b.refcount);
        }
    }

    #[test]
    fn incref_then_decref_is_identity() {
        let topo = TopologyInfo::uniform(2, 2, 2, 2);
        let mut tree = tree_for(&topo);
        tree.incref_core(5);
        tree.decref_core(5);
        for node in &tree.nodes {
            assert_eq!(node.refcount[NodeLevel::Core as usize], 0);
        }
    }

    #[test]
    fn find_first_core_picks_least_loaded_branch() {
        let topo = TopologyInfo::uniform(1, 2, 2, 2);
        let mut tree = tree_for(&topo);
        let proc = ProcessState::default();
        let c0 = tree.find_first_core(&proc).unwrap();
        assert_eq!(c0, 0);
        tree.incref_core(c0);
        let c1 = tree.find_first_core(&proc).unwrap();
        // core 0's whole socket (0,1,2,3) is now more loaded than socket 1.
        assert_eq!(c1, 4);
    }

    #[test]
    fn find_best_core_prefers_same_cpu_sibling() {
        let topo = TopologyInfo::uniform(1, 2, 2, 2);
        let mut tree = tree_for(&topo);
        let mut proc = ProcessState::default();
        tree.incref_core(0);
        intrusive::push_back::<AllocLink>(&mut tree.cores, &mut proc.alloc_me, 0);
        let best = tree.find_best_core(&proc).unwrap();
        assert_eq!(best, 1);
    }

    #[test]
    fn find_best_core_returns_none_when_full() {
        let topo = TopologyInfo::uniform(1, 1, 1, 2);
        let mut tree = tree_for(&topo);
        let mut proc = ProcessState::default();
        for c in 0..topo.num_cores {
            tree.incref_core(c);
            intrusive::push_back::<AllocLink>(&mut tree.cores, &mut proc.alloc_me, c);
        }
        assert_eq!(tree.find_best_core(&proc), None);
    }
}
