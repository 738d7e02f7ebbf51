//! Machine topology descriptors.
//!
//! The field layout mirrors the `core_info` / `topology_info` structures used
//! by the topology-aware scheduler this allocator is descended from: a dense,
//! zero-based id at every level (NUMA domain, socket, CPU package, core), plus
//! the per-level counts needed to size a resource tree.

use alloc::vec::Vec;

/// Describes a single logical core's position in the machine topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreInfo {
    /// Dense id of this core, 0..num_cores. Doubles as the core's arena id.
    pub absolute_core_id: u32,
    /// Dense id of the CPU package this core belongs to.
    pub cpu_id: u32,
    /// Dense id of the socket this core belongs to.
    pub socket_id: u32,
    /// Dense id of the NUMA domain this core belongs to.
    pub numa_id: u32,
    /// Whether this core is online and available for allocation.
    pub online: bool,
}

/// Describes the full topology of a machine: per-level counts plus the
/// flat list of [`CoreInfo`] entries, one per core, ordered by
/// `absolute_core_id`.
///
/// The allocator assumes a perfectly regular tree: every NUMA domain has the
/// same number of sockets, every socket the same number of CPUs, every CPU
/// the same number of cores. `core_list[i].absolute_core_id == i` and the
/// nesting order (NUMA, then socket, then CPU, then core) is the order in
/// which cores appear in `core_list`.
#[derive(Debug, Clone)]
pub struct TopologyInfo {
    /// Number of NUMA domains.
    pub num_numa: u32,
    /// Number of sockets per NUMA domain.
    pub sockets_per_numa: u32,
    /// Number of CPU packages per socket.
    pub cpus_per_socket: u32,
    /// Number of cores per CPU package.
    pub cores_per_cpu: u32,
    /// Total number of sockets (`num_numa * sockets_per_numa`).
    pub num_sockets: u32,
    /// Total number of CPU packages (`num_sockets * cpus_per_socket`).
    pub num_cpus: u32,
    /// Total number of cores (`num_cpus * cores_per_cpu`).
    pub num_cores: u32,
    /// Per-core descriptors, dense and ordered by `absolute_core_id`.
    pub core_list: Vec<CoreInfo>,
}

/// A topology descriptor failed to validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyError {
    /// One of the per-level counts is zero.
    ZeroDimension,
    /// The derived totals (`num_sockets`, `num_cpus`, `num_cores`) don't
    /// agree with the per-level counts.
    InconsistentCounts,
    /// `core_list.len() != num_cores`.
    CoreListLengthMismatch,
    /// A core's `absolute_core_id` doesn't match its position in `core_list`.
    CoreListOutOfOrder,
}

impl TopologyInfo {
    /// Builds a topology descriptor for a perfectly regular machine, with
    /// core ids assigned densely in nesting order: NUMA, then socket, then
    /// CPU, then core. This is the layout every scenario and test in this
    /// crate assumes.
    pub fn uniform(
        num_numa: u32,
        sockets_per_numa: u32,
        cpus_per_socket: u32,
        cores_per_cpu: u32,
    ) -> Self {
        let num_sockets = num_numa * sockets_per_numa;
        let num_cpus = num_sockets * cpus_per_socket;
        let num_cores = num_cpus * cores_per_cpu;

        let mut core_list = Vec::with_capacity(num_cores as usize);
        let mut absolute_core_id = 0;
        for numa_id in 0..num_numa {
            for socket_local in 0..sockets_per_numa {
                let socket_id = numa_id * sockets_per_numa + socket_local;
                for cpu_local in 0..cpus_per_socket {
                    let cpu_id = socket_id * cpus_per_socket + cpu_local;
                    for _ in 0..cores_per_cpu {
                        core_list.push(CoreInfo {
                            absolute_core_id,
                            cpu_id,
                            socket_id,
                            numa_id,
                            online: true,
                        });
                        absolute_core_id += 1;
                    }
                }
            }
        }

        Self {
            num_numa,
            sockets_per_numa,
            cpus_per_socket,
            cores_per_cpu,
            num_sockets,
            num_cpus,
            num_cores,
            core_list,
        }
    }

    /// Checks internal consistency: no zero dimensions, derived totals agree
    /// with the per-level counts, and `core_list` is dense and in order.
    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.num_numa == 0
            || self.sockets_per_numa == 0
            || self.cpus_per_socket == 0
            || self.cores_per_cpu == 0
        {
            return Err(TopologyError::ZeroDimension);
        }
        if self.num_sockets != self.num_numa * self.sockets_per_numa
            || self.num_cpus != self.num_sockets * self.cpus_per_socket
            || self.num_cores != self.num_cpus * self.cores_per_cpu
        {
            log::warn!("topology counts are inconsistent with per-level dimensions");
            return Err(TopologyError::InconsistentCounts);
        }
        if self.core_list.len() != self.num_cores as usize {
            return Err(TopologyError::CoreListLengthMismatch);
        }
        for (i, core) in self.core_list.iter().enumerate() {
            if core.absolute_core_id != i as u32 {
                return Err(TopologyError::CoreListOutOfOrder);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_assigns_dense_nested_ids() {
        let topo = TopologyInfo::uniform(1, 2, 2, 2);
        assert_eq!(topo.num_cores, 8);
        assert_eq!(topo.core_list[0].socket_id, 0);
        assert_eq!(topo.core_list[0].cpu_id, 0);
        assert_eq!(topo.core_list[3].socket_id, 0);
        assert_eq!(topo.core_list[3].cpu_id, 1);
        assert_eq!(topo.core_list[4].socket_id, 1);
        assert_eq!(topo.core_list[7].socket_id, 1);
        assert!(topo.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_dimension() {
        let mut topo = TopologyInfo::uniform(1, 2, 2, 2);
        topo.cores_per_cpu = 0;
        assert_eq!(topo.validate(), Err(TopologyError::ZeroDimension));
    }

    #[test]
    fn validate_rejects_short_core_list() {
        let mut topo = TopologyInfo::uniform(1, 2, 2, 2);
        topo.core_list.pop();
        assert_eq!(topo.validate(), Err(TopologyError::CoreListLengthMismatch));
    }
}
