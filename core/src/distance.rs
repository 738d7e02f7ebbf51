//! Pairwise core distance table.
//!
//! Grounded in the score matrix `init_score` builds in the scheduler this
//! allocator is descended from: a flat `num_cores * num_cores` table of
//! monotonically increasing distances by how much of the hierarchy two cores
//! share. The actual scale doesn't matter, only the ordering, so this uses
//! the smallest values that preserve it: same CPU package closer than same
//! socket, closer than same NUMA domain, closer than cross-domain.

use alloc::vec::Vec;
use helix_hal::CoreInfo;

const SAME_CPU: u32 = 1;
const SAME_SOCKET: u32 = 2;
const SAME_NUMA: u32 = 3;
const CROSS_NUMA: u32 = 4;

pub(crate) struct DistanceTable {
    num_cores: u32,
    table: Vec<u32>,
}

impl DistanceTable {
    pub(crate) fn build(core_list: &[CoreInfo]) -> Self {
        let n = core_list.len();
        let mut table = alloc::vec![0u32; n * n];
        for (i, a) in core_list.iter().enumerate() {
            for (j, b) in core_list.iter().enumerate() {
                table[i * n + j] = Self::pair_distance(a, b);
            }
        }
        Self { num_cores: n as u32, table }
    }

    fn pair_distance(a: &CoreInfo, b: &CoreInfo) -> u32 {
        if a.absolute_core_id == b.absolute_core_id {
            0
        } else if a.cpu_id == b.cpu_id {
            SAME_CPU
        } else if a.socket_id == b.socket_id {
            SAME_SOCKET
        } else if a.numa_id == b.numa_id {
            SAME_NUMA
        } else {
            CROSS_NUMA
        }
    }

    pub(crate) fn get(&self, a: u32, b: u32) -> u32 {
        self.table[(a * self.num_cores + b) as usize]
    }
}
