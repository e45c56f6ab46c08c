//! ---
//! cps_section: "04-topology-analysis"
//! cps_subsection: "integration-test"
//! cps_type: "test"
//! cps_scope: "code"
//! cps_description: "Topology service behaviour against reference networks."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
use std::collections::HashMap;

use r_cps_topology::{Path, Topology};

/// The four-bus radial feeder used across the reference scenarios:
/// 10 -100- 20 -101- 30 -102- 40
fn radial_feeder() -> Topology {
    Topology::build(
        &[10, 20, 30, 40],
        &[100, 101, 102],
        &[(10, 20), (20, 30), (30, 40)],
    )
    .unwrap()
}

#[test]
fn radial_feeder_is_one_island_of_bridges() {
    let topology = radial_feeder();

    let (islands, count) = topology.find_electrical_islands();
    assert_eq!(count, 1);
    assert!(islands.values().all(|&island| island == 0));

    let mut bridges = topology.find_critical_lines();
    bridges.sort_unstable();
    assert_eq!(bridges, vec![100, 101, 102]);

    let path = topology.find_path(10, 40, &[]).unwrap();
    assert_eq!(
        path,
        Path {
            buses: vec![10, 20, 30, 40],
            branches: vec![100, 101, 102],
        }
    );
}

#[test]
fn opening_a_bridge_splits_the_island_and_breaks_the_path() {
    let mut topology = radial_feeder();
    let (before, count_before) = topology.find_electrical_islands();
    assert_eq!(count_before, 1);

    assert!(topology.open_branch(101));
    let (after, count_after) = topology.find_electrical_islands();
    assert_eq!(count_after, 2);
    assert!(topology.find_path(10, 40, &[]).is_none());

    // Partitions agree except across the opened bridge: 10/20 stay
    // together, 30/40 stay together.
    assert_eq!(after[&10], after[&20]);
    assert_eq!(after[&30], after[&40]);
    assert_ne!(after[&10], after[&30]);
    assert_eq!(before[&10], before[&40]);
}

#[test]
fn open_set_excludes_branches_from_path_search() {
    let topology = Topology::build(
        &[1, 2, 3],
        &[10, 11, 12],
        &[(1, 2), (2, 3), (1, 3)],
    )
    .unwrap();

    // Direct edge wins at equal depth only if BFS reaches it first; with
    // the direct edge excluded the two-hop route is the only one left.
    let path = topology.find_path(1, 3, &[12]).unwrap();
    assert_eq!(path.buses, vec![1, 2, 3]);
    assert_eq!(path.branches, vec![10, 11]);
    assert!(topology.find_path(1, 3, &[10, 12]).is_none());
}

#[test]
fn trivial_and_unknown_paths() {
    let topology = radial_feeder();
    assert_eq!(
        topology.find_path(20, 20, &[]),
        Some(Path {
            buses: vec![20],
            branches: vec![],
        })
    );
    assert!(topology.find_path(10, 99, &[]).is_none());
    assert!(topology.find_path(99, 10, &[]).is_none());
}

#[test]
fn path_length_matches_bfs_distance() {
    // A 2x3 grid; BFS distance from corner to corner is 3 edges.
    let topology = Topology::build(
        &[1, 2, 3, 4, 5, 6],
        &[10, 11, 12, 13, 14, 15, 16],
        &[(1, 2), (2, 3), (4, 5), (5, 6), (1, 4), (2, 5), (3, 6)],
    )
    .unwrap();
    let path = topology.find_path(1, 6, &[]).unwrap();
    assert_eq!(path.branches.len(), 3);
    assert_eq!(path.buses.len(), 4);
    assert_eq!(path.buses.first(), Some(&1));
    assert_eq!(path.buses.last(), Some(&6));
}

#[test]
fn radiality_flips_when_a_loop_closes() {
    let topology = radial_feeder();
    assert_eq!(topology.check_radial_islands(), HashMap::from([(0, true)]));

    let looped = Topology::build(
        &[10, 20, 30, 40],
        &[100, 101, 102, 103],
        &[(10, 20), (20, 30), (30, 40), (10, 30)],
    )
    .unwrap();
    assert_eq!(looped.check_radial_islands(), HashMap::from([(0, false)]));

    let loops = looped.find_all_loops();
    assert_eq!(loops.len(), 1);
    let mut cycle = loops[0].clone();
    cycle.sort_unstable();
    assert_eq!(cycle, vec![10, 20, 30]);
}

#[test]
fn loop_closure_removes_interior_bridges() {
    let looped = Topology::build(
        &[10, 20, 30, 40],
        &[100, 101, 102, 103],
        &[(10, 20), (20, 30), (30, 40), (10, 30)],
    )
    .unwrap();
    // Only the spur to bus 40 is still a bridge.
    assert_eq!(looped.find_critical_lines(), vec![102]);
    // Bus 30 is the articulation point carrying the spur.
    assert_eq!(looped.find_critical_buses(), vec![30]);
}

#[test]
fn parallel_branches_are_never_bridges() {
    let topology = Topology::build(
        &[1, 2, 3],
        &[10, 11, 12],
        &[(1, 2), (1, 2), (2, 3)],
    )
    .unwrap();
    assert_eq!(topology.find_critical_lines(), vec![12]);
}

#[test]
fn articulation_points_on_a_chain() {
    let topology = radial_feeder();
    let mut critical = topology.find_critical_buses();
    critical.sort_unstable();
    assert_eq!(critical, vec![20, 30]);
}

#[test]
fn downstream_and_upstream_traces_on_a_chain() {
    // 1 -A- 2 -B- 3 -C- 4 -D- 5, source at bus 1.
    let topology = Topology::build(
        &[1, 2, 3, 4, 5],
        &[70, 71, 72, 73],
        &[(1, 2), (2, 3), (3, 4), (4, 5)],
    )
    .unwrap();

    let downstream = topology.trace_power_flow(3, &[1], true);
    assert_eq!(downstream.buses, vec![3, 4, 5]);
    assert_eq!(downstream.branches, vec![72, 73]);

    let upstream = topology.trace_power_flow(3, &[1], false);
    assert_eq!(upstream.buses, vec![1, 2, 3]);
    assert_eq!(upstream.branches, vec![70, 71]);
}

#[test]
fn downstream_trace_from_the_source_spans_the_island() {
    let topology = radial_feeder();
    let trace = topology.trace_power_flow(10, &[10], true);
    assert_eq!(trace.buses, vec![10, 20, 30, 40]);
    assert_eq!(trace.branches, vec![100, 101, 102]);
}

#[test]
fn trace_edge_cases() {
    let topology = Topology::build(
        &[1, 2, 3, 9],
        &[10, 11],
        &[(1, 2), (2, 3)],
    )
    .unwrap();

    // Unknown start: empty result.
    assert_eq!(topology.trace_power_flow(77, &[1], true), Path::default());

    // Start unreachable from any source: just the start bus.
    let isolated = topology.trace_power_flow(9, &[1], true);
    assert_eq!(isolated.buses, vec![9]);
    assert!(isolated.branches.is_empty());

    // Upstream from a source is the normative single-bus result.
    let at_source = topology.trace_power_flow(1, &[1], false);
    assert_eq!(at_source.buses, vec![1]);
    assert!(at_source.branches.is_empty());
}

#[test]
fn islands_are_maximal_components() {
    let topology = Topology::build(
        &[1, 2, 3, 4, 5],
        &[10, 11],
        &[(1, 2), (4, 5)],
    )
    .unwrap();
    let (islands, count) = topology.find_electrical_islands();
    assert_eq!(count, 3);
    assert_eq!(islands[&1], islands[&2]);
    assert_eq!(islands[&4], islands[&5]);
    assert_ne!(islands[&1], islands[&3]);
    assert_ne!(islands[&3], islands[&4]);
    // Index order follows the lowest internal index per component.
    assert_eq!(islands[&1], 0);
    assert_eq!(islands[&3], 1);
    assert_eq!(islands[&4], 2);
}

#[test]
fn radiality_per_island() {
    let topology = Topology::build(
        &[1, 2, 3, 4, 5, 6],
        &[10, 11, 12, 13],
        &[(1, 2), (4, 5), (5, 6), (6, 4)],
    )
    .unwrap();
    let radial = topology.check_radial_islands();
    assert_eq!(radial[&0], true); // 1-2 chain
    assert_eq!(radial[&1], true); // isolated bus 3
    assert_eq!(radial[&2], false); // 4-5-6 triangle
}
