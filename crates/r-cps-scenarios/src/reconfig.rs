//! ---
//! cps_section: "05-scenario-agents"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Reference co-simulation scenarios exercising the kernel, registry and topology."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! Logic protection and network reconfiguration.
//!
//! A feeder of bus / line / breaker / protection entities is laid over
//! the topology service. Main protections clear faults on their own
//! line; slower backups re-verify that the fault path is still
//! energised before tripping, which makes them natural breaker-failure
//! protection. A reconfiguration agent reacts to breaker openings by
//! re-running island analysis, and restores de-energised buses through
//! the shortest available tie path.
//!
//! Two reference cases are provided: a permanent fault with a stuck
//! breaker (cleared one level up by the backup), and a fault whose lost
//! downstream buses are re-supplied through a normally-open tie.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use anyhow::Result;
use r_cps_common::SimulationConfig;
use r_cps_kernel::{Scheduler, SimContext, SimDuration, SimTime, TaskResult};
use r_cps_registry::{Entity, Registry};
use r_cps_topology::Topology;
use tracing::{debug, error, info, warn};

use crate::events::{
    BreakerCommand, BreakerStatus, LogicFaultInfo, LOGIC_BREAKER_STATUS_CHANGED_EVENT,
    LOGIC_BREAKER_TRIP_COMMAND_EVENT, LOGIC_FAULT_EVENT,
};

/// Breaker operating time from trip order to open contacts.
const BREAKER_OPERATE_TIME: SimDuration = SimDuration::from_millis(20);
/// Switching time for closing a tie during reconfiguration.
const TIE_CLOSE_TIME: SimDuration = SimDuration::from_millis(100);

/// A bus of the feeder model.
#[derive(Debug, Clone)]
pub struct BusTag {
    pub name: String,
    pub is_source: bool,
}

/// A line (or tie) of the feeder model. `downstream` links the normal
/// radial supply chain; ties are outside the chain.
#[derive(Debug, Clone)]
pub struct LineTag {
    pub name: String,
    pub from_bus: Entity,
    pub to_bus: Entity,
    pub breaker: Entity,
    pub downstream: Option<Entity>,
}

/// The breaker isolating one line.
#[derive(Debug, Clone)]
pub struct BreakerTag {
    pub name: String,
    pub line: Entity,
    /// A stuck breaker acknowledges trip orders but never opens.
    pub stuck: bool,
}

/// Breaker position. Normally-open breakers are tie points available to
/// the reconfiguration agent.
#[derive(Debug, Clone, Copy)]
pub struct BreakerState {
    pub is_open: bool,
    pub normally_open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionKind {
    Main,
    Backup,
}

/// A protection device watching one line. `covers` lists every line the
/// device reacts to; a backup device covers its own line plus the lines
/// downstream of it.
#[derive(Debug, Clone)]
pub struct ProtectionTag {
    pub name: String,
    pub kind: ProtectionKind,
    pub line: Entity,
    pub breaker: Entity,
    pub covers: Vec<Entity>,
    pub trip_delay: SimDuration,
}

/// Shared electrical state of the scenario: the live topology (closed,
/// healthy lines only) and the set of currently faulted lines.
pub struct NetworkState {
    pub live: RefCell<Topology>,
    pub active_faults: RefCell<Vec<Entity>>,
}

impl NetworkState {
    /// Is `bus` in the same electrical island as any source bus?
    pub fn is_supplied(&self, registry: &Registry, bus: Entity) -> bool {
        let (islands, _) = self.live.borrow().find_electrical_islands();
        let Some(&bus_island) = islands.get(&bus.raw()) else {
            return false;
        };
        let mut supplied = false;
        registry.for_each(|entity, tag: &BusTag| {
            if tag.is_source && islands.get(&entity.raw()).copied() == Some(bus_island) {
                supplied = true;
            }
        });
        supplied
    }
}

/// The provisioned feeder.
#[derive(Debug, Clone)]
pub struct FeederModel {
    pub buses: Vec<Entity>,
    pub lines: Vec<Entity>,
    pub breakers: Vec<Entity>,
    pub protections: Vec<Entity>,
    pub source_bus: Entity,
    pub tie_breaker: Option<Entity>,
}

/// Feeder build switches for the two reference cases.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeederOptions {
    /// Make the most-downstream breaker refuse trip orders.
    pub stuck_last_breaker: bool,
    /// Add a normally-open tie from the feeder end back to the source.
    pub with_tie: bool,
}

/// Build the reference feeder: source bus 1, load buses 2..4 chained by
/// lines A, B, C, each isolated by its own breaker; optionally a
/// normally-open tie from bus 4 back to the source. Main protection per
/// line (50 ms) plus graded backups on A and B.
pub fn build_feeder(registry: &Registry, options: FeederOptions) -> FeederModel {
    let mut buses = Vec::new();
    let source_bus = registry.create_entity();
    registry.attach(
        source_bus,
        BusTag {
            name: "substation".to_owned(),
            is_source: true,
        },
    );
    buses.push(source_bus);
    for i in 2..=4 {
        let bus = registry.create_entity();
        registry.attach(
            bus,
            BusTag {
                name: format!("bus-{i}"),
                is_source: false,
            },
        );
        buses.push(bus);
    }

    let mut lines = Vec::new();
    let mut breakers = Vec::new();
    let mut make_line = |name: &str, from: Entity, to: Entity, stuck: bool, tie: bool| {
        let breaker = registry.create_entity();
        let line = registry.create_entity();
        registry.attach(
            breaker,
            BreakerTag {
                name: format!("breaker-{name}"),
                line,
                stuck,
            },
        );
        registry.attach(
            breaker,
            BreakerState {
                is_open: tie,
                normally_open: tie,
            },
        );
        registry.attach(
            line,
            LineTag {
                name: format!("line-{name}"),
                from_bus: from,
                to_bus: to,
                breaker,
                downstream: None,
            },
        );
        lines.push(line);
        breakers.push(breaker);
        (line, breaker)
    };

    let (line_a, _) = make_line("a", buses[0], buses[1], false, false);
    let (line_b, _) = make_line("b", buses[1], buses[2], false, false);
    let (line_c, _) = make_line("c", buses[2], buses[3], options.stuck_last_breaker, false);
    let tie_breaker = if options.with_tie {
        let (_, breaker_t) = make_line("tie", buses[3], buses[0], false, true);
        Some(breaker_t)
    } else {
        None
    };

    // Normal radial supply chain: A feeds B feeds C.
    registry
        .with_mut(line_a, |tag: &mut LineTag| tag.downstream = Some(line_b))
        .expect("line a tagged");
    registry
        .with_mut(line_b, |tag: &mut LineTag| tag.downstream = Some(line_c))
        .expect("line b tagged");

    let mut protections = Vec::new();
    let mut make_protection =
        |name: &str, kind: ProtectionKind, line: Entity, covers: Vec<Entity>, delay_ms: i64| {
            let protection = registry.create_entity();
            let breaker = registry
                .with(line, |tag: &LineTag| tag.breaker)
                .expect("protected line tagged");
            registry.attach(
                protection,
                ProtectionTag {
                    name: name.to_owned(),
                    kind,
                    line,
                    breaker,
                    covers,
                    trip_delay: SimDuration::from_millis(delay_ms),
                },
            );
            protections.push(protection);
        };

    make_protection("main-a", ProtectionKind::Main, line_a, vec![line_a], 50);
    make_protection("main-b", ProtectionKind::Main, line_b, vec![line_b], 50);
    make_protection("main-c", ProtectionKind::Main, line_c, vec![line_c], 50);
    make_protection(
        "backup-b",
        ProtectionKind::Backup,
        line_b,
        vec![line_b, line_c],
        2000,
    );
    make_protection(
        "backup-a",
        ProtectionKind::Backup,
        line_a,
        vec![line_a, line_b, line_c],
        3000,
    );

    info!(
        buses = buses.len(),
        lines = lines.len(),
        protections = protections.len(),
        tie = options.with_tie,
        stuck_last_breaker = options.stuck_last_breaker,
        "feeder model provisioned"
    );

    FeederModel {
        buses,
        lines,
        breakers,
        protections,
        source_bus,
        tie_breaker,
    }
}

/// Build the topology of currently conducting lines: breaker closed and
/// no active fault.
pub fn rebuild_live_topology(
    registry: &Registry,
    model: &FeederModel,
    faults: &[Entity],
) -> Topology {
    let bus_ids: Vec<u64> = model.buses.iter().map(|bus| bus.raw()).collect();
    let breaker_states = registry.kind::<BreakerState>();
    let lines = registry.kind::<LineTag>();

    let mut branch_ids = Vec::new();
    let mut endpoints = Vec::new();
    for &line in &model.lines {
        if faults.contains(&line) {
            continue;
        }
        let Some(tag) = lines.get(line) else { continue };
        let open = breaker_states
            .get(tag.breaker)
            .map(|state| state.is_open)
            .unwrap_or(false);
        if open {
            continue;
        }
        branch_ids.push(line.raw());
        endpoints.push((tag.from_bus.raw(), tag.to_bus.raw()));
    }
    Topology::build(&bus_ids, &branch_ids, &endpoints).expect("feeder model is consistent")
}

/// Walk the supply chain from `from_line` towards `fault_line`,
/// checking every breaker on the way. The path counts as de-energised
/// as soon as one breaker is open; reaching the chain end without
/// meeting the fault counts as energised (conservative for protection).
pub fn fault_path_energized(registry: &Registry, from_line: Entity, fault_line: Entity) -> bool {
    let lines = registry.kind::<LineTag>();
    let breaker_states = registry.kind::<BreakerState>();

    let mut current = from_line;
    for _ in 0..10 {
        let Some(tag) = lines.get(current) else {
            // Unknown line on the path: assume energised.
            return true;
        };
        let open = breaker_states
            .get(tag.breaker)
            .map(|state| state.is_open)
            .unwrap_or(false);
        if open {
            return false;
        }
        if current == fault_line {
            return true;
        }
        match tag.downstream {
            Some(next) => current = next,
            None => return true,
        }
    }
    warn!(
        from = from_line.raw(),
        fault = fault_line.raw(),
        "supply-chain walk exceeded its safety bound; assuming energised"
    );
    true
}

/// Per-breaker agent: opens on a matching trip order after the
/// operating time, unless stuck, and publishes the position change.
pub async fn breaker_logic(ctx: SimContext, registry: Rc<Registry>, breaker: Entity) -> TaskResult {
    let tags = registry.kind::<BreakerTag>();
    let states = registry.kind::<BreakerState>();
    let Some((name, stuck)) = tags.get(breaker).map(|tag| (tag.name.clone(), tag.stuck)) else {
        error!(breaker = %breaker, "breaker has no identity tag; agent exits");
        return Ok(());
    };
    info!(sim_ms = ctx.now().as_millis(), breaker = %name, stuck, "breaker agent armed");

    loop {
        let command = ctx
            .wait_for_event::<BreakerCommand>(LOGIC_BREAKER_TRIP_COMMAND_EVENT)
            .await?;
        if command.breaker != breaker {
            continue;
        }
        let already_open = states.get(breaker).map(|s| s.is_open).unwrap_or(false);
        if already_open {
            info!(sim_ms = ctx.now().as_millis(), breaker = %name, "already open; nothing to do");
            continue;
        }
        if stuck {
            warn!(sim_ms = ctx.now().as_millis(), breaker = %name, "breaker failure: refuses to operate");
            continue;
        }
        ctx.delay(BREAKER_OPERATE_TIME).await?;
        if let Some(mut state) = states.get_mut(breaker) {
            state.is_open = true;
        }
        info!(sim_ms = ctx.now().as_millis(), breaker = %name, "breaker opened");
        ctx.trigger_event(
            LOGIC_BREAKER_STATUS_CHANGED_EVENT,
            BreakerStatus {
                breaker,
                is_open: true,
            },
        );
    }
}

/// Per-device protection agent. Reacts to faults on covered lines;
/// after the grading delay it re-verifies that the fault path is still
/// energised, so a faster device (or a healthy breaker) downstream
/// resets it instead of tripping.
pub async fn protection_logic(
    ctx: SimContext,
    registry: Rc<Registry>,
    protection: Entity,
) -> TaskResult {
    let tags = registry.kind::<ProtectionTag>();
    let Some(tag) = tags.get(protection).map(|t| t.clone()) else {
        error!(protection = %protection, "protection has no tag; agent exits");
        return Ok(());
    };
    info!(
        sim_ms = ctx.now().as_millis(),
        protection = %tag.name,
        kind = ?tag.kind,
        delay_ms = tag.trip_delay.as_millis(),
        "protection agent armed"
    );

    loop {
        let fault = ctx
            .wait_for_event::<LogicFaultInfo>(LOGIC_FAULT_EVENT)
            .await?;
        if !tag.covers.contains(&fault.faulted_line) {
            debug!(
                sim_ms = ctx.now().as_millis(),
                protection = %tag.name,
                faulted_line = fault.faulted_line.raw(),
                "fault outside protected range"
            );
            continue;
        }
        info!(
            sim_ms = ctx.now().as_millis(),
            protection = %tag.name,
            faulted_line = fault.faulted_line.raw(),
            "picked up; grading timer started"
        );
        ctx.delay(tag.trip_delay).await?;

        if fault_path_energized(&registry, tag.line, fault.faulted_line) {
            info!(
                sim_ms = ctx.now().as_millis(),
                protection = %tag.name,
                breaker = tag.breaker.raw(),
                "fault still energised after grading; tripping"
            );
            ctx.trigger_event(
                LOGIC_BREAKER_TRIP_COMMAND_EVENT,
                BreakerCommand {
                    breaker: tag.breaker,
                },
            );
        } else {
            info!(
                sim_ms = ctx.now().as_millis(),
                protection = %tag.name,
                "fault cleared elsewhere during grading; resetting"
            );
        }
    }
}

/// A restoration option: close `tie_breaker` to re-supply a lost bus
/// over `path_len` branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconfigurationPlan {
    pub tie_breaker: Entity,
    pub tie_line: Entity,
    pub path_len: usize,
}

/// Search the full feeder graph for the shortest healthy path from
/// `lost_bus` to any source through one closable tie, excluding faulted
/// lines and lines already isolated by an open breaker.
pub fn find_reconfiguration_option(
    registry: &Registry,
    model: &FeederModel,
    lost_bus: Entity,
    faults: &[Entity],
) -> Option<ReconfigurationPlan> {
    let lines = registry.kind::<LineTag>();
    let breaker_states = registry.kind::<BreakerState>();
    let bus_tags = registry.kind::<BusTag>();

    // Full graph: every line regardless of breaker position.
    let bus_ids: Vec<u64> = model.buses.iter().map(|bus| bus.raw()).collect();
    let mut branch_ids = Vec::new();
    let mut endpoints = Vec::new();
    for &line in &model.lines {
        let Some(tag) = lines.get(line) else { continue };
        branch_ids.push(line.raw());
        endpoints.push((tag.from_bus.raw(), tag.to_bus.raw()));
    }
    let full = Topology::build(&bus_ids, &branch_ids, &endpoints)
        .expect("feeder model is consistent");

    // Baseline exclusions: faulted lines and lines behind open breakers.
    let mut base_open: HashSet<u64> = faults.iter().map(|line| line.raw()).collect();
    let mut candidates = Vec::new();
    for &line in &model.lines {
        let Some(tag) = lines.get(line) else { continue };
        let Some(state) = breaker_states.get(tag.breaker).map(|s| *s) else {
            continue;
        };
        if state.is_open {
            base_open.insert(line.raw());
            if state.normally_open && !faults.contains(&line) {
                candidates.push((tag.breaker, line));
            }
        }
    }

    let sources: Vec<Entity> = model
        .buses
        .iter()
        .copied()
        .filter(|&bus| bus_tags.get(bus).map(|t| t.is_source).unwrap_or(false))
        .collect();

    let mut best: Option<ReconfigurationPlan> = None;
    for (tie_breaker, tie_line) in candidates {
        let open_set: Vec<u64> = base_open
            .iter()
            .copied()
            .filter(|&branch| branch != tie_line.raw())
            .collect();
        for &source in &sources {
            if let Some(path) = full.find_path(lost_bus.raw(), source.raw(), &open_set) {
                let plan = ReconfigurationPlan {
                    tie_breaker,
                    tie_line,
                    path_len: path.branches.len(),
                };
                if best.map_or(true, |b| plan.path_len < b.path_len) {
                    best = Some(plan);
                }
            }
        }
    }
    best
}

/// Network reconfiguration agent. On every breaker opening it updates
/// the live topology, finds buses cut off from all sources and tries to
/// restore them by closing the best tie.
pub async fn reconfiguration_agent(
    ctx: SimContext,
    registry: Rc<Registry>,
    model: FeederModel,
    net: Rc<NetworkState>,
) -> TaskResult {
    info!(sim_ms = ctx.now().as_millis(), "reconfiguration agent armed");
    let breaker_tags = registry.kind::<BreakerTag>();
    let breaker_states = registry.kind::<BreakerState>();
    let bus_tags = registry.kind::<BusTag>();

    loop {
        let status = ctx
            .wait_for_event::<BreakerStatus>(LOGIC_BREAKER_STATUS_CHANGED_EVENT)
            .await?;
        if !status.is_open {
            continue;
        }
        let Some(line) = breaker_tags.get(status.breaker).map(|tag| tag.line) else {
            continue;
        };
        net.live.borrow_mut().open_branch(line.raw());

        let lost: Vec<Entity> = {
            let (islands, _) = net.live.borrow().find_electrical_islands();
            let source_islands: HashSet<usize> = model
                .buses
                .iter()
                .filter(|&&bus| bus_tags.get(bus).map(|t| t.is_source).unwrap_or(false))
                .filter_map(|bus| islands.get(&bus.raw()).copied())
                .collect();
            model
                .buses
                .iter()
                .copied()
                .filter(|bus| {
                    islands
                        .get(&bus.raw())
                        .map(|island| !source_islands.contains(island))
                        .unwrap_or(true)
                })
                .collect()
        };
        if lost.is_empty() {
            info!(
                sim_ms = ctx.now().as_millis(),
                opened_line = line.raw(),
                "no bus lost supply; nothing to reconfigure"
            );
            continue;
        }
        warn!(
            sim_ms = ctx.now().as_millis(),
            lost = lost.len(),
            "buses lost supply; evaluating restoration options"
        );

        let faults = net.active_faults.borrow().clone();
        let mut best: Option<ReconfigurationPlan> = None;
        for &bus in &lost {
            if let Some(plan) = find_reconfiguration_option(&registry, &model, bus, &faults) {
                if best.map_or(true, |b| plan.path_len < b.path_len) {
                    best = Some(plan);
                }
            }
        }
        let Some(plan) = best else {
            warn!(
                sim_ms = ctx.now().as_millis(),
                "no restoration option available; buses stay de-energised"
            );
            continue;
        };

        info!(
            sim_ms = ctx.now().as_millis(),
            tie_breaker = plan.tie_breaker.raw(),
            path_len = plan.path_len,
            "closing tie to restore supply"
        );
        ctx.delay(TIE_CLOSE_TIME).await?;
        if let Some(mut state) = breaker_states.get_mut(plan.tie_breaker) {
            state.is_open = false;
        }
        *net.live.borrow_mut() = rebuild_live_topology(&registry, &model, &faults);

        let restored = lost
            .iter()
            .filter(|&&bus| net.is_supplied(&registry, bus))
            .count();
        info!(
            sim_ms = ctx.now().as_millis(),
            restored,
            lost = lost.len(),
            "reconfiguration complete"
        );
        ctx.trigger_event(
            LOGIC_BREAKER_STATUS_CHANGED_EVENT,
            BreakerStatus {
                breaker: plan.tie_breaker,
                is_open: false,
            },
        );
    }
}

/// Scripted permanent fault: recorded as active, then announced to the
/// protection agents.
async fn fault_script(ctx: SimContext, net: Rc<NetworkState>, fault_line: Entity) -> TaskResult {
    ctx.delay(SimDuration::from_millis(1000)).await?;
    net.active_faults.borrow_mut().push(fault_line);
    warn!(
        sim_ms = ctx.now().as_millis(),
        line = fault_line.raw(),
        "injecting permanent fault"
    );
    ctx.trigger_event(
        LOGIC_FAULT_EVENT,
        LogicFaultInfo {
            faulted_line: fault_line,
        },
    );
    Ok(())
}

/// Everything a test needs to inspect after a case has run.
pub struct ScenarioOutcome {
    pub registry: Rc<Registry>,
    pub model: FeederModel,
    pub net: Rc<NetworkState>,
}

fn run_case(
    options: FeederOptions,
    faulted_line_index: usize,
    duration: SimDuration,
) -> ScenarioOutcome {
    let registry = Rc::new(Registry::new());
    let model = build_feeder(&registry, options);
    let net = Rc::new(NetworkState {
        live: RefCell::new(rebuild_live_topology(&registry, &model, &[])),
        active_faults: RefCell::new(Vec::new()),
    });

    let scheduler = Scheduler::new();
    for &breaker in &model.breakers {
        let registry = Rc::clone(&registry);
        scheduler
            .spawn(move |ctx| breaker_logic(ctx, registry, breaker))
            .detach();
    }
    for &protection in &model.protections {
        let registry = Rc::clone(&registry);
        scheduler
            .spawn(move |ctx| protection_logic(ctx, registry, protection))
            .detach();
    }
    {
        let registry = Rc::clone(&registry);
        let model = model.clone();
        let net = Rc::clone(&net);
        scheduler
            .spawn(move |ctx| reconfiguration_agent(ctx, registry, model, net))
            .detach();
    }
    {
        let net = Rc::clone(&net);
        let fault_line = model.lines[faulted_line_index];
        scheduler
            .spawn(move |ctx| fault_script(ctx, net, fault_line))
            .detach();
    }

    let mut scheduler = scheduler;
    scheduler.run_until(SimTime::ZERO + duration);

    let states = registry.kind::<BreakerState>();
    let tags = registry.kind::<BreakerTag>();
    for &breaker in &model.breakers {
        if let (Some(tag), Some(state)) = (tags.get(breaker), states.get(breaker)) {
            info!(
                breaker = %tag.name,
                stuck = tag.stuck,
                is_open = state.is_open,
                "final breaker state"
            );
        }
    }

    ScenarioOutcome {
        registry,
        model,
        net,
    }
}

/// Permanent fault on the last line with its breaker stuck: the main
/// protection fails to clear, the backup one level up takes over, the
/// slowest backup resets once the path is dead.
pub fn run_breaker_failure_case(duration: SimDuration) -> ScenarioOutcome {
    info!("starting breaker-failure case");
    run_case(
        FeederOptions {
            stuck_last_breaker: true,
            with_tie: false,
        },
        2, // line C
        duration,
    )
}

/// Permanent fault mid-feeder with a healthy breaker and a tie: the
/// main protection isolates the fault and the reconfiguration agent
/// restores the downstream buses through the tie.
pub fn run_reconfiguration_case(duration: SimDuration) -> ScenarioOutcome {
    info!("starting reconfiguration case");
    run_case(
        FeederOptions {
            stuck_last_breaker: false,
            with_tie: true,
        },
        1, // line B
        duration,
    )
}

/// Run both reference cases back to back.
pub fn run_scenario(config: &SimulationConfig) -> Result<()> {
    let duration = SimDuration::from(config.duration);
    run_breaker_failure_case(duration);
    run_reconfiguration_case(duration);
    Ok(())
}
