//! ---
//! cps_section: "04-topology-analysis"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Indexed multigraph model of the distribution network with online analysis."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! Connectivity and structural-vulnerability analysis.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::{BranchId, BusId, Path, Topology};

impl Topology {
    /// Partition the network into electrical islands (connected
    /// components). Island indices are 0-based, assigned in increasing
    /// order of the lowest internal bus index in each component.
    /// Returns the bus → island mapping and the island count.
    pub fn find_electrical_islands(&self) -> (HashMap<BusId, usize>, usize) {
        if !self.is_ready() {
            return (HashMap::new(), 0);
        }

        let n = self.bus_count();
        let mut island_of = vec![usize::MAX; n];
        let mut island_count = 0usize;

        for start in 0..n {
            if island_of[start] != usize::MAX {
                continue;
            }
            let island = island_count;
            island_count += 1;

            let mut queue = VecDeque::new();
            queue.push_back(start);
            island_of[start] = island;
            while let Some(u) = queue.pop_front() {
                for entry in &self.adjacency[u] {
                    if island_of[entry.other] == usize::MAX {
                        island_of[entry.other] = island;
                        queue.push_back(entry.other);
                    }
                }
            }
        }

        let mapping = self
            .bus_id_by_index
            .iter()
            .enumerate()
            .map(|(idx, &bus)| (bus, island_of[idx]))
            .collect();
        (mapping, island_count)
    }

    /// Shortest path (by edge count, breadth-first) between two buses,
    /// ignoring every branch in `open_branches`.
    ///
    /// `start == end` yields the single-bus path; unknown endpoints or a
    /// disconnected pair yield `None`. `branches.len()` always equals
    /// `buses.len() - 1`.
    pub fn find_path(
        &self,
        start: BusId,
        end: BusId,
        open_branches: &[BranchId],
    ) -> Option<Path> {
        let start_idx = self.internal_index(start)?;
        let end_idx = self.internal_index(end)?;
        if start_idx == end_idx {
            return Some(Path {
                buses: vec![start],
                branches: Vec::new(),
            });
        }

        let open_set: HashSet<BranchId> = open_branches.iter().copied().collect();
        let n = self.bus_count();
        let mut predecessor: Vec<Option<(usize, BranchId)>> = vec![None; n];
        let mut visited = vec![false; n];
        let mut queue = VecDeque::new();

        queue.push_back(start_idx);
        visited[start_idx] = true;
        let mut found = false;

        while let Some(u) = queue.pop_front() {
            if u == end_idx {
                found = true;
                break;
            }
            for entry in &self.adjacency[u] {
                if open_set.contains(&entry.branch) {
                    continue;
                }
                if !visited[entry.other] {
                    visited[entry.other] = true;
                    predecessor[entry.other] = Some((u, entry.branch));
                    queue.push_back(entry.other);
                }
            }
        }

        if !found {
            return None;
        }

        let mut path = Path::default();
        let mut current = end_idx;
        path.buses.push(self.bus_id_by_index[current]);
        while let Some((prev, branch)) = predecessor[current] {
            path.branches.push(branch);
            path.buses.push(self.bus_id_by_index[prev]);
            current = prev;
        }
        path.buses.reverse();
        path.branches.reverse();
        Some(path)
    }

    /// All bridges: branches whose removal increases the island count
    /// (Tarjan). The parent filter is by parent *node*, so neither of
    /// two parallel branches between the same buses is ever a bridge.
    pub fn find_critical_lines(&self) -> Vec<BranchId> {
        if !self.is_ready() {
            return Vec::new();
        }
        let n = self.bus_count();
        let mut state = TarjanState::new(n);
        let mut bridges = Vec::new();
        for root in 0..n {
            if state.disc[root].is_none() {
                self.bridge_dfs(root, &mut state, &mut bridges);
            }
        }
        bridges
    }

    fn bridge_dfs(&self, u: usize, state: &mut TarjanState, bridges: &mut Vec<BranchId>) {
        state.time += 1;
        state.disc[u] = Some(state.time);
        state.low[u] = state.time;
        for entry in &self.adjacency[u] {
            let v = entry.other;
            if Some(v) == state.parent[u] {
                continue;
            }
            if let Some(disc_v) = state.disc[v] {
                state.low[u] = state.low[u].min(disc_v);
            } else {
                state.parent[v] = Some(u);
                self.bridge_dfs(v, state, bridges);
                state.low[u] = state.low[u].min(state.low[v]);
                if state.low[v] > state.disc[u].expect("u is discovered") {
                    bridges.push(entry.branch);
                }
            }
        }
    }

    /// All articulation points: buses whose removal disconnects their
    /// island (Tarjan).
    pub fn find_critical_buses(&self) -> Vec<BusId> {
        if !self.is_ready() {
            return Vec::new();
        }
        let n = self.bus_count();
        let mut state = TarjanState::new(n);
        let mut is_critical = vec![false; n];
        for root in 0..n {
            if state.disc[root].is_none() {
                self.articulation_dfs(root, &mut state, &mut is_critical);
            }
        }
        (0..n)
            .filter(|&idx| is_critical[idx])
            .map(|idx| self.bus_id_by_index[idx])
            .collect()
    }

    fn articulation_dfs(&self, u: usize, state: &mut TarjanState, is_critical: &mut [bool]) {
        state.time += 1;
        state.disc[u] = Some(state.time);
        state.low[u] = state.time;
        let mut children = 0usize;
        for entry in &self.adjacency[u] {
            let v = entry.other;
            if Some(v) == state.parent[u] {
                continue;
            }
            if let Some(disc_v) = state.disc[v] {
                state.low[u] = state.low[u].min(disc_v);
            } else {
                children += 1;
                state.parent[v] = Some(u);
                self.articulation_dfs(v, state, is_critical);
                state.low[u] = state.low[u].min(state.low[v]);
                let disc_u = state.disc[u].expect("u is discovered");
                if state.parent[u].is_none() && children > 1 {
                    is_critical[u] = true;
                }
                if state.parent[u].is_some() && state.low[v] >= disc_u {
                    is_critical[u] = true;
                }
            }
        }
    }

    /// Simple cycles encountered via DFS back-edges, de-duplicated by
    /// their sorted bus set.
    ///
    /// Heuristic by contract: on dense networks this is a subset of all
    /// simple cycles, not a cycle basis. Each returned cycle lists its
    /// buses in ascending internal-index order.
    pub fn find_all_loops(&self) -> Vec<Vec<BusId>> {
        if !self.is_ready() {
            return Vec::new();
        }
        let n = self.bus_count();
        let mut colour = vec![Colour::White; n];
        let mut path = Vec::new();
        let mut cycles: Vec<Vec<usize>> = Vec::new();
        for root in 0..n {
            if colour[root] == Colour::White {
                self.loop_dfs(root, None, &mut colour, &mut path, &mut cycles);
            }
        }
        cycles
            .into_iter()
            .map(|cycle| {
                cycle
                    .into_iter()
                    .map(|idx| self.bus_id_by_index[idx])
                    .collect()
            })
            .collect()
    }

    fn loop_dfs(
        &self,
        u: usize,
        parent: Option<usize>,
        colour: &mut [Colour],
        path: &mut Vec<usize>,
        cycles: &mut Vec<Vec<usize>>,
    ) {
        colour[u] = Colour::Grey;
        path.push(u);
        for entry in &self.adjacency[u] {
            let v = entry.other;
            if Some(v) == parent {
                continue;
            }
            match colour[v] {
                Colour::Grey => {
                    if let Some(pos) = path.iter().position(|&node| node == v) {
                        let mut cycle = path[pos..].to_vec();
                        cycle.sort_unstable();
                        if !cycles.contains(&cycle) {
                            cycles.push(cycle);
                        }
                    }
                }
                Colour::White => self.loop_dfs(v, Some(u), colour, path, cycles),
                Colour::Black => {}
            }
        }
        path.pop();
        colour[u] = Colour::Black;
    }

    /// Per-island radiality: an island is radial (tree-shaped) iff its
    /// edge count equals its bus count minus one, with edges counted by
    /// the handshake lemma (`sum of degrees / 2`).
    pub fn check_radial_islands(&self) -> HashMap<usize, bool> {
        if !self.is_ready() {
            return HashMap::new();
        }
        let (island_of, island_count) = self.find_electrical_islands();
        if island_count == 0 {
            return HashMap::new();
        }

        let mut buses_in = vec![0usize; island_count];
        let mut degree_sum_in = vec![0usize; island_count];
        for (idx, &bus) in self.bus_id_by_index.iter().enumerate() {
            let island = island_of[&bus];
            buses_in[island] += 1;
            degree_sum_in[island] += self.adjacency[idx].len();
        }

        (0..island_count)
            .map(|island| {
                let edges = degree_sum_in[island] / 2;
                (island, edges == buses_in[island] - 1)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

struct TarjanState {
    disc: Vec<Option<u32>>,
    low: Vec<u32>,
    parent: Vec<Option<usize>>,
    time: u32,
}

impl TarjanState {
    fn new(n: usize) -> Self {
        Self {
            disc: vec![None; n],
            low: vec![0; n],
            parent: vec![None; n],
            time: 0,
        }
    }
}
