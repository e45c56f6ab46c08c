//! ---
//! cps_section: "04-topology-analysis"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Indexed multigraph model of the distribution network with online analysis."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
use std::collections::HashMap;

use tracing::warn;

use crate::error::TopologyError;

/// External bus identifier (a node; an electrical junction).
pub type BusId = u64;

/// External branch identifier (an edge: line, transformer or
/// breaker-section).
pub type BranchId = u64;

/// One adjacency entry: a branch leaving a bus towards `other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AdjacencyEntry {
    pub branch: BranchId,
    /// Internal index of the far-end bus.
    pub other: usize,
}

/// Result of a path search or a flow trace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Path {
    pub buses: Vec<BusId>,
    pub branches: Vec<BranchId>,
}

/// Indexed undirected multigraph of the distribution network.
///
/// Parallel branches (same endpoints, distinct branch ids) and
/// self-loops are permitted; both endpoint entries record the same
/// branch id, so adjacency stays symmetric by construction. Branches may
/// be opened online but not re-added; rebuilding means calling
/// [`Topology::build`] again.
#[derive(Debug, Default)]
pub struct Topology {
    pub(crate) adjacency: Vec<Vec<AdjacencyEntry>>,
    pub(crate) bus_index: HashMap<BusId, usize>,
    pub(crate) bus_id_by_index: Vec<BusId>,
    pub(crate) branch_endpoints: HashMap<BranchId, (BusId, BusId)>,
}

impl Topology {
    /// Build the network model from parallel sequences of bus ids,
    /// branch ids and branch endpoint pairs.
    ///
    /// A branch whose either endpoint is missing from `bus_ids` is
    /// skipped with a warning; the resulting model stays consistent.
    pub fn build(
        bus_ids: &[BusId],
        branch_ids: &[BranchId],
        branch_endpoints: &[(BusId, BusId)],
    ) -> Result<Self, TopologyError> {
        if branch_ids.len() != branch_endpoints.len() {
            return Err(TopologyError::LengthMismatch {
                branch_ids: branch_ids.len(),
                endpoints: branch_endpoints.len(),
            });
        }

        let mut bus_index = HashMap::with_capacity(bus_ids.len());
        for (idx, &bus) in bus_ids.iter().enumerate() {
            if bus_index.insert(bus, idx).is_some() {
                return Err(TopologyError::DuplicateBus(bus));
            }
        }

        let mut topology = Topology {
            adjacency: vec![Vec::with_capacity(6); bus_ids.len()],
            bus_index,
            bus_id_by_index: bus_ids.to_vec(),
            branch_endpoints: HashMap::with_capacity(branch_ids.len()),
        };

        for (i, &branch) in branch_ids.iter().enumerate() {
            let (bus_a, bus_b) = branch_endpoints[i];
            let (Some(&u), Some(&v)) = (
                topology.bus_index.get(&bus_a),
                topology.bus_index.get(&bus_b),
            ) else {
                warn!(
                    branch,
                    from = bus_a,
                    to = bus_b,
                    "branch references an undefined bus; skipping it"
                );
                continue;
            };

            topology.adjacency[u].push(AdjacencyEntry { branch, other: v });
            topology.adjacency[v].push(AdjacencyEntry { branch, other: u });
            topology.branch_endpoints.insert(branch, (bus_a, bus_b));
        }

        Ok(topology)
    }

    /// True once a model has been built.
    pub fn is_ready(&self) -> bool {
        !self.adjacency.is_empty()
    }

    /// Number of buses in the model.
    pub fn bus_count(&self) -> usize {
        self.bus_id_by_index.len()
    }

    /// Endpoint buses of a present branch.
    pub fn branch_endpoints(&self, branch: BranchId) -> Option<(BusId, BusId)> {
        self.branch_endpoints.get(&branch).copied()
    }

    pub(crate) fn internal_index(&self, bus: BusId) -> Option<usize> {
        self.bus_index.get(&bus).copied()
    }

    /// Connection count per bus. Parallel branches count multiply and a
    /// self-loop counts twice, both endpoint entries being on one bus.
    pub fn bus_degrees(&self) -> HashMap<BusId, usize> {
        self.bus_id_by_index
            .iter()
            .enumerate()
            .map(|(idx, &bus)| (bus, self.adjacency[idx].len()))
            .collect()
    }

    /// Remove a branch from the model (a breaker opening, a line
    /// tripping). Returns `false` for unknown ids. Opening is terminal
    /// for that id until the next rebuild.
    pub fn open_branch(&mut self, branch: BranchId) -> bool {
        let Some((bus_a, bus_b)) = self.branch_endpoints.remove(&branch) else {
            return false;
        };
        // Both lookups succeed: the branch was recorded only with both
        // endpoints present.
        let u = self.bus_index[&bus_a];
        let v = self.bus_index[&bus_b];

        self.adjacency[u].retain(|entry| !(entry.branch == branch && entry.other == v));
        self.adjacency[v].retain(|entry| !(entry.branch == branch && entry.other == u));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_mismatch_is_rejected() {
        let err = Topology::build(&[1, 2], &[10, 11], &[(1, 2)]).unwrap_err();
        assert_eq!(
            err,
            TopologyError::LengthMismatch {
                branch_ids: 2,
                endpoints: 1
            }
        );
    }

    #[test]
    fn duplicate_bus_is_rejected() {
        let err = Topology::build(&[1, 2, 1], &[], &[]).unwrap_err();
        assert_eq!(err, TopologyError::DuplicateBus(1));
    }

    #[test]
    fn branches_to_unknown_buses_are_skipped() {
        let topology = Topology::build(&[1, 2], &[10, 11], &[(1, 2), (2, 99)]).unwrap();
        assert!(topology.branch_endpoints(10).is_some());
        assert!(topology.branch_endpoints(11).is_none());
        assert_eq!(topology.bus_degrees()[&2], 1);
    }

    #[test]
    fn adjacency_is_symmetric() {
        let topology =
            Topology::build(&[1, 2, 3], &[10, 11, 12], &[(1, 2), (2, 3), (1, 2)]).unwrap();
        for (u, entries) in topology.adjacency.iter().enumerate() {
            for entry in entries {
                let mirrored = topology.adjacency[entry.other]
                    .iter()
                    .filter(|back| back.branch == entry.branch && back.other == u)
                    .count();
                assert!(mirrored >= 1, "missing mirror of branch {}", entry.branch);
            }
        }
    }

    #[test]
    fn degrees_count_parallel_edges_and_self_loops() {
        let topology =
            Topology::build(&[1, 2], &[10, 11, 12], &[(1, 2), (1, 2), (1, 1)]).unwrap();
        let degrees = topology.bus_degrees();
        assert_eq!(degrees[&1], 4); // two parallels + self-loop twice
        assert_eq!(degrees[&2], 2);
    }

    #[test]
    fn open_branch_removes_exactly_one_parallel_edge() {
        let mut topology = Topology::build(&[1, 2], &[10, 11], &[(1, 2), (1, 2)]).unwrap();
        assert!(topology.open_branch(10));
        assert!(!topology.open_branch(10));
        assert_eq!(topology.bus_degrees()[&1], 1);
        assert!(topology.branch_endpoints(11).is_some());
    }
}
