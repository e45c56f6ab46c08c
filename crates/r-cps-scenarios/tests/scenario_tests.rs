//! ---
//! cps_section: "05-scenario-agents"
//! cps_subsection: "integration-test"
//! cps_type: "test"
//! cps_scope: "code"
//! cps_description: "End-to-end behaviour of the reference scenarios."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
use std::rc::Rc;

use r_cps_common::SimulationConfig;
use r_cps_kernel::{Scheduler, SimDuration, SimTime};
use r_cps_registry::Registry;
use r_cps_scenarios::frequency::{
    provision_fleet, spawn_vpp_agents, PhysicalState, DISTURBANCE_START_S,
};
use r_cps_scenarios::reconfig::{
    run_breaker_failure_case, run_reconfiguration_case, BreakerState, BreakerTag,
};
use r_cps_scenarios::{avc, frequency};

#[test]
fn breaker_failure_is_cleared_one_level_up() {
    let outcome = run_breaker_failure_case(SimDuration::from_millis(5000));
    let registry = &outcome.registry;
    let states = registry.kind::<BreakerState>();
    let tags = registry.kind::<BreakerTag>();

    // Breakers are provisioned in feeder order: A, B, C.
    let breaker_a = outcome.model.breakers[0];
    let breaker_b = outcome.model.breakers[1];
    let breaker_c = outcome.model.breakers[2];

    // The stuck breaker never opened; the backup one level up cleared
    // the fault; the slowest backup reset instead of over-tripping.
    assert!(tags.get(breaker_c).unwrap().stuck);
    assert!(!states.get(breaker_c).unwrap().is_open);
    assert!(states.get(breaker_b).unwrap().is_open);
    assert!(!states.get(breaker_a).unwrap().is_open);

    // Everything beyond the opened backup breaker is dark; the source
    // side keeps supply.
    let buses = &outcome.model.buses;
    assert!(outcome.net.is_supplied(registry, buses[0]));
    assert!(outcome.net.is_supplied(registry, buses[1]));
    assert!(!outcome.net.is_supplied(registry, buses[2]));
    assert!(!outcome.net.is_supplied(registry, buses[3]));
}

#[test]
fn reconfiguration_restores_downstream_buses_through_the_tie() {
    let outcome = run_reconfiguration_case(SimDuration::from_millis(6000));
    let registry = &outcome.registry;
    let states = registry.kind::<BreakerState>();

    let breaker_b = outcome.model.breakers[1];
    let tie_breaker = outcome.model.tie_breaker.expect("tie configured");

    // Fault on line B isolated by its own breaker; tie closed afterwards.
    assert!(states.get(breaker_b).unwrap().is_open);
    assert!(!states.get(tie_breaker).unwrap().is_open);

    // Every bus is supplied again, through the tie for the feeder tail.
    for &bus in &outcome.model.buses {
        assert!(
            outcome.net.is_supplied(registry, bus),
            "bus {bus} should be re-supplied"
        );
    }

    // The live topology is one island and stays radial (the faulted
    // line is out, the tie is in).
    let live = outcome.net.live.borrow();
    let (_, island_count) = live.find_electrical_islands();
    assert_eq!(island_count, 1);
    let radial = live.check_radial_islands();
    assert_eq!(radial[&0], true);
}

#[test]
fn ess_fleet_discharges_after_the_frequency_disturbance() {
    let registry = Rc::new(Registry::new());
    let scheduler = Scheduler::new();
    let fleet = provision_fleet(&registry, 7);
    spawn_vpp_agents(
        &scheduler,
        Rc::clone(&registry),
        fleet.clone(),
        SimDuration::from_millis(20),
        None,
    );

    let mut scheduler = scheduler;
    // Two seconds into the disturbance the sag is well past the deadband.
    let deadline = SimTime::ZERO
        + SimDuration::from_millis((DISTURBANCE_START_S * 1000.0) as i64 + 2000);
    scheduler.run_until(deadline);

    let states = registry.kind::<PhysicalState>();
    let ess_power: f64 = fleet
        .ess_units
        .iter()
        .map(|&e| states.get(e).unwrap().power_kw)
        .sum();
    // Deep sag: every unit saturates at its 1 MW limit.
    assert!(
        ess_power > 50_000.0,
        "expected a strong fleet response, got {ess_power} kW"
    );

    // SOC stayed within bounds while responding.
    for &e in &fleet.ess_units {
        let soc = states.get(e).unwrap().soc;
        assert!((0.0..=1.0).contains(&soc));
    }
}

#[test]
fn fleet_is_idle_before_the_disturbance() {
    let registry = Rc::new(Registry::new());
    let scheduler = Scheduler::new();
    let fleet = provision_fleet(&registry, 7);
    spawn_vpp_agents(
        &scheduler,
        Rc::clone(&registry),
        fleet.clone(),
        SimDuration::from_millis(20),
        None,
    );

    let mut scheduler = scheduler;
    scheduler.run_until(SimTime::from_millis(3000));

    let states = registry.kind::<PhysicalState>();
    let ess_power: f64 = fleet
        .ess_units
        .iter()
        .map(|&e| states.get(e).unwrap().power_kw)
        .sum();
    assert_eq!(ess_power, 0.0);
}

#[test]
fn vpp_scenario_writes_the_data_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = SimulationConfig {
        duration: std::time::Duration::from_millis(1000),
        real_time: false,
        oracle_step: std::time::Duration::from_millis(20),
        random_seed: 1,
        data_directory: dir.path().to_path_buf(),
    };
    frequency::run_scenario(&config).unwrap();

    let contents =
        std::fs::read_to_string(dir.path().join("vpp_frequency_response.tsv")).unwrap();
    let mut lines = contents.lines();
    assert_eq!(
        lines.next(),
        Some("sim_ms\tsim_s\trelative_s\tfreq_dev_hz\tfleet_power_kw")
    );
    // One row per oracle step over one second.
    let rows: Vec<&str> = lines.collect();
    assert!(rows.len() >= 49, "expected ~50 rows, got {}", rows.len());
    assert!(rows[0].split('\t').count() == 5);
}

#[test]
fn avc_scenario_runs_to_its_deadline() {
    let config = SimulationConfig {
        duration: std::time::Duration::from_millis(40_000),
        real_time: false,
        ..SimulationConfig::default()
    };
    avc::run_scenario(&config).unwrap();
}
