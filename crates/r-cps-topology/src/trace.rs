//! ---
//! cps_section: "04-topology-analysis"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Indexed multigraph model of the distribution network with online analysis."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! Power-flow tracing relative to a BFS tree rooted at the sources.

use std::collections::{HashSet, VecDeque};

use tracing::warn;

use crate::graph::{BranchId, BusId, Path, Topology};

impl Topology {
    /// Trace equipment upstream (towards a source) or downstream (away
    /// from the sources) of `start`.
    ///
    /// A multi-source BFS from `source_buses` establishes a parent for
    /// every reachable bus. Downstream collects `start`'s BFS subtree
    /// plus every branch with both endpoints inside it; upstream walks
    /// the parent chain from `start` towards a source. Results are
    /// sorted ascending. An unknown `start` yields an empty path; a
    /// `start` unreachable from any source (or itself a source, for the
    /// upstream walk) yields `{[start], []}`.
    pub fn trace_power_flow(
        &self,
        start: BusId,
        source_buses: &[BusId],
        trace_downstream: bool,
    ) -> Path {
        if !self.is_ready() {
            return Path::default();
        }

        let n = self.bus_count();
        let mut parent: Vec<Option<usize>> = vec![None; n];
        let mut visited = vec![false; n];
        let mut queue = VecDeque::new();

        for &source in source_buses {
            if let Some(idx) = self.internal_index(source) {
                if !visited[idx] {
                    visited[idx] = true;
                    queue.push_back(idx);
                }
            }
        }
        while let Some(u) = queue.pop_front() {
            for entry in &self.adjacency[u] {
                if !visited[entry.other] {
                    visited[entry.other] = true;
                    parent[entry.other] = Some(u);
                    queue.push_back(entry.other);
                }
            }
        }

        let Some(start_idx) = self.internal_index(start) else {
            warn!(bus = start, "trace start bus is not in the topology");
            return Path::default();
        };

        let mut result = if trace_downstream {
            self.collect_downstream(start_idx, &parent)
        } else {
            self.collect_upstream(start_idx, &parent)
        };
        result.buses.sort_unstable();
        result.branches.sort_unstable();
        result
    }

    /// Every bus whose parent chain passes through `start`, plus every
    /// branch with both endpoints inside that set.
    fn collect_downstream(&self, start_idx: usize, parent: &[Option<usize>]) -> Path {
        let mut downstream: HashSet<usize> = HashSet::new();
        let mut queue = VecDeque::new();
        downstream.insert(start_idx);
        queue.push_back(start_idx);

        while let Some(u) = queue.pop_front() {
            for entry in &self.adjacency[u] {
                let v = entry.other;
                if parent[v] == Some(u) && downstream.insert(v) {
                    queue.push_back(v);
                }
            }
        }

        let mut branches: HashSet<BranchId> = HashSet::new();
        for &u in &downstream {
            for entry in &self.adjacency[u] {
                if downstream.contains(&entry.other) {
                    branches.insert(entry.branch);
                }
            }
        }

        Path {
            buses: downstream
                .into_iter()
                .map(|idx| self.bus_id_by_index[idx])
                .collect(),
            branches: branches.into_iter().collect(),
        }
    }

    /// The parent chain from `start` towards whichever source claimed it
    /// in the BFS, with the branch used at each step.
    fn collect_upstream(&self, start_idx: usize, parent: &[Option<usize>]) -> Path {
        let mut buses: HashSet<BusId> = HashSet::new();
        let mut branches: HashSet<BranchId> = HashSet::new();

        let mut current = start_idx;
        buses.insert(self.bus_id_by_index[current]);
        while let Some(up) = parent[current] {
            buses.insert(self.bus_id_by_index[up]);
            if let Some(entry) = self.adjacency[current].iter().find(|e| e.other == up) {
                branches.insert(entry.branch);
            }
            current = up;
        }

        Path {
            buses: buses.into_iter().collect(),
            branches: branches.into_iter().collect(),
        }
    }
}
