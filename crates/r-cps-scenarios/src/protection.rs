//! ---
//! cps_section: "05-scenario-agents"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Reference co-simulation scenarios exercising the kernel, registry and topology."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! Relay protection scenario.
//!
//! Protected equipment carries a catalogue of relays (definite-time
//! overcurrent, three-zone distance). A protection-system agent fans
//! every incoming fault over the catalogue, spawns a detached delayed
//! trip per picked-up relay, and breaker agents open on trip orders.

use std::rc::Rc;

use anyhow::Result;
use r_cps_common::SimulationConfig;
use r_cps_kernel::{Scheduler, SimContext, SimDuration, SimTime, TaskResult};
use r_cps_registry::{Entity, Registry};
use tracing::info;

use crate::events::{
    FaultInfo, BREAKER_OPENED_EVENT, ENTITY_TRIP_EVENT, FAULT_INFO_EVENT,
};

/// Delay returned when a fault lies outside every zone; effectively
/// "never trips" at scenario time scales.
const NO_ZONE_DELAY: SimDuration = SimDuration::from_millis(99_999);

/// A protective relay element. Implementations decide whether to pick
/// up on a fault and how long to wait before ordering the trip.
pub trait Relay {
    /// Should this relay start for `fault`, given it protects
    /// `protected` equipment?
    fn pick_up(&self, fault: &FaultInfo, protected: Entity) -> bool;

    /// Time from pick-up to the trip order. May depend on fault
    /// severity (distance zones); instantaneous stages return zero.
    fn trip_delay(&self, fault: &FaultInfo) -> SimDuration;

    /// Stage name, for the event log.
    fn name(&self) -> &str;
}

/// Definite-time overcurrent stage.
pub struct OverCurrentRelay {
    pickup_ka: f64,
    delay: SimDuration,
    stage: String,
}

impl OverCurrentRelay {
    pub fn new(pickup_ka: f64, delay: SimDuration, stage: impl Into<String>) -> Self {
        Self {
            pickup_ka,
            delay,
            stage: stage.into(),
        }
    }
}

impl Relay for OverCurrentRelay {
    fn pick_up(&self, fault: &FaultInfo, _protected: Entity) -> bool {
        fault.current_ka >= self.pickup_ka
    }

    fn trip_delay(&self, _fault: &FaultInfo) -> SimDuration {
        self.delay
    }

    fn name(&self) -> &str {
        &self.stage
    }
}

/// Three-zone distance protection. Zone reaches nest outward; the trip
/// delay grows with the zone. Faults on foreign equipment are only
/// covered by the outermost zone (remote back-up).
pub struct DistanceRelay {
    reach_ohm: [f64; 3],
    delay: [SimDuration; 3],
}

impl DistanceRelay {
    pub fn new(zones: [(f64, SimDuration); 3]) -> Self {
        Self {
            reach_ohm: [zones[0].0, zones[1].0, zones[2].0],
            delay: [zones[0].1, zones[1].1, zones[2].1],
        }
    }
}

impl Relay for DistanceRelay {
    fn pick_up(&self, fault: &FaultInfo, protected: Entity) -> bool {
        match fault.faulty_entity {
            Some(faulted) if faulted != protected => {
                // Back-up reach only.
                fault.impedance_ohm <= self.reach_ohm[2]
            }
            _ => self
                .reach_ohm
                .iter()
                .any(|&reach| fault.impedance_ohm <= reach),
        }
    }

    fn trip_delay(&self, fault: &FaultInfo) -> SimDuration {
        for (zone, &reach) in self.reach_ohm.iter().enumerate() {
            if fault.impedance_ohm <= reach {
                return self.delay[zone];
            }
        }
        NO_ZONE_DELAY
    }

    fn name(&self) -> &str {
        "distance"
    }
}

/// A relay installed on a piece of protected equipment. One entity per
/// mounted relay; several mounts may protect the same equipment.
pub struct RelayMount {
    pub relay: Box<dyn Relay>,
    pub protects: Entity,
}

/// Inject a fault into the protection system from anywhere in the
/// driver or another agent.
pub fn inject_fault(ctx: &SimContext, fault: FaultInfo) -> usize {
    ctx.trigger_event(FAULT_INFO_EVENT, fault)
}

/// Protection system: fan every fault over the relay catalogue and spawn
/// a detached delayed trip per picked-up relay, so slow stages never
/// block fast ones.
pub async fn protection_system(ctx: SimContext, registry: Rc<Registry>) -> TaskResult {
    info!(sim_ms = ctx.now().as_millis(), "protection system armed; waiting for faults");
    let mounts = registry.kind::<RelayMount>();

    loop {
        let fault = ctx
            .wait_for_event::<FaultInfo>(FAULT_INFO_EVENT)
            .await?
            .with_computed_impedance();

        info!(
            sim_ms = ctx.now().as_millis(),
            faulty_entity = fault.faulty_entity.map(|e| e.raw()),
            current_ka = fault.current_ka,
            impedance_ohm = fault.impedance_ohm,
            distance_km = fault.distance_km,
            "fault reported"
        );

        let mut picked_up = Vec::new();
        mounts.for_each(|_, mount| {
            if mount.relay.pick_up(&fault, mount.protects) {
                picked_up.push((
                    mount.protects,
                    mount.relay.trip_delay(&fault),
                    mount.relay.name().to_owned(),
                ));
            }
        });

        for (protected, delay, stage) in picked_up {
            info!(
                sim_ms = ctx.now().as_millis(),
                protected = protected.raw(),
                stage = %stage,
                delay_ms = delay.as_millis(),
                "relay picked up"
            );
            ctx.spawn(move |ctx| trip_later(ctx, protected, delay, stage, fault.faulty_entity))
                .detach();
        }
    }
}

/// Delayed trip order for one picked-up relay.
async fn trip_later(
    ctx: SimContext,
    protected: Entity,
    delay: SimDuration,
    stage: String,
    faulty_entity: Option<Entity>,
) -> TaskResult {
    ctx.delay(delay).await?;
    info!(
        sim_ms = ctx.now().as_millis(),
        protected = protected.raw(),
        stage = %stage,
        fault_on = faulty_entity.map(|e| e.raw()),
        "trip order issued"
    );
    ctx.trigger_event(ENTITY_TRIP_EVENT, protected);
    Ok(())
}

/// Breaker agent bound to one piece of equipment: opens on a matching
/// trip order after its operating time and announces the opening.
pub async fn breaker_agent(ctx: SimContext, equipment: Entity, name: String) -> TaskResult {
    info!(
        sim_ms = ctx.now().as_millis(),
        equipment = equipment.raw(),
        breaker = %name,
        "breaker agent armed"
    );
    loop {
        let tripped = ctx.wait_for_event::<Entity>(ENTITY_TRIP_EVENT).await?;
        if tripped != equipment {
            continue;
        }
        info!(
            sim_ms = ctx.now().as_millis(),
            breaker = %name,
            "trip order received; operating"
        );
        ctx.delay(SimDuration::from_millis(100)).await?;
        info!(sim_ms = ctx.now().as_millis(), breaker = %name, "breaker opened");
        ctx.trigger_event(BREAKER_OPENED_EVENT, equipment);
    }
}

/// Scripted fault injector: a close-in line fault at 6 s, then a
/// transformer fault at 13 s.
pub async fn fault_injector(ctx: SimContext, line: Entity, transformer: Entity) -> TaskResult {
    ctx.delay(SimDuration::from_millis(6000)).await?;
    let line_fault = FaultInfo {
        current_ka: 15.0,
        voltage_kv: 220.0,
        impedance_ohm: (220.0 / 15.0) * 0.8,
        distance_km: 10.0,
        faulty_entity: Some(line),
    };
    info!(sim_ms = ctx.now().as_millis(), line = line.raw(), "injecting line fault");
    inject_fault(&ctx, line_fault);

    ctx.delay(SimDuration::from_millis(7000)).await?;
    let transformer_fault = FaultInfo {
        current_ka: 3.0,
        voltage_kv: 220.0,
        faulty_entity: Some(transformer),
        ..FaultInfo::default()
    }
    .with_computed_impedance();
    info!(
        sim_ms = ctx.now().as_millis(),
        transformer = transformer.raw(),
        "injecting transformer fault"
    );
    inject_fault(&ctx, transformer_fault);
    Ok(())
}

/// The protected equipment of the reference scenario.
#[derive(Debug, Clone, Copy)]
pub struct ProtectedPlant {
    pub line: Entity,
    pub transformer: Entity,
}

/// Create the line + transformer pair with their relay catalogue:
/// an instantaneous-stage overcurrent and a three-zone distance relay on
/// the line, a definite-time overcurrent on the transformer.
pub fn provision_plant(registry: &Registry) -> ProtectedPlant {
    let line = registry.create_entity();
    let line_oc_mount = registry.create_entity();
    registry.attach(
        line_oc_mount,
        RelayMount {
            relay: Box::new(OverCurrentRelay::new(
                5.0,
                SimDuration::from_millis(200),
                "line-oc-fast",
            )),
            protects: line,
        },
    );
    let line_z_mount = registry.create_entity();
    registry.attach(
        line_z_mount,
        RelayMount {
            relay: Box::new(DistanceRelay::new([
                (5.0, SimDuration::ZERO),
                (15.0, SimDuration::from_millis(300)),
                (25.0, SimDuration::from_millis(700)),
            ])),
            protects: line,
        },
    );

    let transformer = registry.create_entity();
    let transformer_oc_mount = registry.create_entity();
    registry.attach(
        transformer_oc_mount,
        RelayMount {
            relay: Box::new(OverCurrentRelay::new(
                2.5,
                SimDuration::from_millis(300),
                "transformer-oc-main",
            )),
            protects: transformer,
        },
    );

    info!(
        line = line.raw(),
        transformer = transformer.raw(),
        "protected plant provisioned"
    );
    ProtectedPlant { line, transformer }
}

/// Wire up and run the relay-protection scenario.
pub fn run_scenario(config: &SimulationConfig) -> Result<()> {
    let registry = Rc::new(Registry::new());
    let scheduler = Scheduler::new();

    let plant = provision_plant(&registry);
    scheduler
        .spawn({
            let registry = Rc::clone(&registry);
            move |ctx| protection_system(ctx, registry)
        })
        .detach();
    scheduler
        .spawn(move |ctx| fault_injector(ctx, plant.line, plant.transformer))
        .detach();
    scheduler
        .spawn(move |ctx| breaker_agent(ctx, plant.line, "line-breaker".to_owned()))
        .detach();
    scheduler
        .spawn(move |ctx| breaker_agent(ctx, plant.transformer, "transformer-breaker".to_owned()))
        .detach();

    let mut scheduler = scheduler;
    let deadline = SimTime::ZERO + SimDuration::from(config.duration);
    info!(deadline = %deadline, "starting relay-protection scenario");
    if config.real_time {
        scheduler.run_real_time_until(deadline);
    } else {
        scheduler.run_until(deadline);
    }
    info!(final_sim_ms = scheduler.now().as_millis(), "protection scenario finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_pair() -> (Entity, Entity) {
        let registry = Registry::new();
        (registry.create_entity(), registry.create_entity())
    }

    #[test]
    fn overcurrent_picks_up_at_and_above_its_setting() {
        let (line, _) = entity_pair();
        let relay = OverCurrentRelay::new(5.0, SimDuration::from_millis(200), "oc");
        let below = FaultInfo {
            current_ka: 4.9,
            ..FaultInfo::default()
        };
        let at = FaultInfo {
            current_ka: 5.0,
            ..FaultInfo::default()
        };
        assert!(!relay.pick_up(&below, line));
        assert!(relay.pick_up(&at, line));
        assert_eq!(relay.trip_delay(&at), SimDuration::from_millis(200));
    }

    #[test]
    fn distance_zones_grade_the_trip_delay() {
        let (line, other) = entity_pair();
        let relay = DistanceRelay::new([
            (5.0, SimDuration::ZERO),
            (15.0, SimDuration::from_millis(300)),
            (25.0, SimDuration::from_millis(700)),
        ]);

        let zone1 = FaultInfo {
            impedance_ohm: 3.0,
            faulty_entity: Some(line),
            ..FaultInfo::default()
        };
        assert!(relay.pick_up(&zone1, line));
        assert_eq!(relay.trip_delay(&zone1), SimDuration::ZERO);

        let zone2 = FaultInfo {
            impedance_ohm: 10.0,
            faulty_entity: Some(line),
            ..FaultInfo::default()
        };
        assert_eq!(relay.trip_delay(&zone2), SimDuration::from_millis(300));

        // Foreign fault: only the back-up zone reaches it.
        let remote_close = FaultInfo {
            impedance_ohm: 10.0,
            faulty_entity: Some(other),
            ..FaultInfo::default()
        };
        assert!(relay.pick_up(&remote_close, line));
        let remote_far = FaultInfo {
            impedance_ohm: 30.0,
            faulty_entity: Some(other),
            ..FaultInfo::default()
        };
        assert!(!relay.pick_up(&remote_far, line));
    }

    #[test]
    fn impedance_is_derived_from_voltage_and_current_when_absent() {
        let fault = FaultInfo {
            current_ka: 3.0,
            voltage_kv: 220.0,
            ..FaultInfo::default()
        }
        .with_computed_impedance();
        assert!((fault.impedance_ohm - 220.0 / 3.0).abs() < 1e-9);

        let measured = FaultInfo {
            current_ka: 3.0,
            voltage_kv: 220.0,
            impedance_ohm: 12.5,
            ..FaultInfo::default()
        }
        .with_computed_impedance();
        assert_eq!(measured.impedance_ohm, 12.5);
    }
}
