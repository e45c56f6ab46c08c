//! ---
//! cps_section: "05-scenario-agents"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Reference co-simulation scenarios exercising the kernel, registry and topology."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! Virtual-power-plant primary frequency response.
//!
//! A frequency oracle recomputes the post-disturbance system frequency
//! deviation on a fixed step and broadcasts it; every EV charging pile
//! and storage unit in the fleet runs its own response task applying
//! deadband + droop control under state-of-charge constraints. The
//! oracle also aggregates the fleet power and appends one row per step
//! to a tab-separated data file.

use std::rc::Rc;

use anyhow::{Context as _, Result};
use r_cps_common::SimulationConfig;
use r_cps_kernel::{Scheduler, SimContext, SimDuration, SimTime, TaskResult};
use r_cps_registry::{Entity, Registry};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info};

use crate::events::{
    FrequencyInfo, FREQUENCY_UPDATE_EVENT, GENERATOR_READY_EVENT, LOAD_CHANGE_EVENT,
    POWER_ADJUST_REQUEST_EVENT, STABILITY_CONCERN_EVENT,
};
use crate::recorder::DataRecorder;

/// Live electrical state of one fleet device.
#[derive(Debug, Clone, Copy)]
pub struct PhysicalState {
    /// Present device power in kW; positive injects into the grid,
    /// negative draws from it.
    pub power_kw: f64,
    /// State of charge in `[0, 1]`.
    pub soc: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    EvPile,
    EssUnit,
}

/// Droop-control parameters for primary frequency regulation.
#[derive(Debug, Clone, Copy)]
pub struct DroopConfig {
    pub device: DeviceType,
    /// Scheduled power when frequency is nominal, in kW.
    pub base_power_kw: f64,
    /// Droop gain in kW per Hz of deviation.
    pub gain_kw_per_hz: f64,
    /// No response inside this absolute deviation, in Hz.
    pub deadband_hz: f64,
    pub max_output_kw: f64,
    pub min_output_kw: f64,
    pub soc_min: f64,
    pub soc_max: f64,
}

impl DroopConfig {
    /// Nominal storage capacity backing the SOC integration.
    pub fn battery_capacity_kwh(&self) -> f64 {
        match self.device {
            DeviceType::EvPile => 50.0,
            DeviceType::EssUnit => 2000.0,
        }
    }
}

const P_COEFF: f64 = 0.0862;
const M_COEFF: f64 = 0.1404;
const M1_COEFF: f64 = 0.1577;
const M2_COEFF: f64 = 0.0397;
const N_COEFF: f64 = 0.125;

/// Damped-oscillation model of the system frequency deviation at
/// `t_rel` seconds after the disturbance. Zero before the disturbance;
/// negative values are underfrequency.
pub fn frequency_deviation(t_rel: f64) -> f64 {
    if t_rel < 0.0 {
        return 0.0;
    }
    -(M_COEFF + (M1_COEFF * (M_COEFF * t_rel).sin() - M_COEFF * (M_COEFF * t_rel).cos()))
        / M2_COEFF
        * (-N_COEFF * t_rel).exp()
        * P_COEFF
}

/// Deadband + droop power target for one device.
///
/// Underfrequency asks the device to inject (discharge, or at least stop
/// charging); overfrequency shifts the scheduled power downwards. The
/// result is clamped to the device limits and SOC cutoffs.
pub fn droop_target(config: &DroopConfig, soc: f64, deviation_hz: f64) -> f64 {
    let mut power = config.base_power_kw;
    if deviation_hz.abs() > config.deadband_hz {
        if deviation_hz < 0.0 {
            // Effective drop beyond the deadband; negative.
            let effective = deviation_hz + config.deadband_hz;
            power = -config.gain_kw_per_hz * effective;
            if config.device == DeviceType::EvPile {
                if power > 0.0 && soc < config.soc_min {
                    power = 0.0;
                } else if soc < config.soc_min && config.base_power_kw < 0.0 && power < 0.0 {
                    // Low SOC and a charging schedule: at least stop charging.
                    power = 0.0;
                }
            }
        } else {
            let effective = deviation_hz - config.deadband_hz;
            power = config.base_power_kw - config.gain_kw_per_hz * effective;
        }
    }

    power = power.clamp(config.min_output_kw, config.max_output_kw);
    if config.device == DeviceType::EvPile {
        if power < 0.0 && soc >= config.soc_max {
            power = 0.0;
        }
        if power > 0.0 && soc <= config.soc_min {
            power = 0.0;
        }
    }
    power
}

/// Integrate the SOC over `dt_s` seconds at the device's present power.
/// Positive power discharges the battery.
pub fn integrate_soc(state: &mut PhysicalState, config: &DroopConfig, dt_s: f64) {
    if dt_s <= 1e-6 {
        return;
    }
    let energy_kwh = state.power_kw * (dt_s / 3600.0);
    let capacity = config.battery_capacity_kwh();
    if capacity > 0.0 {
        state.soc = (state.soc - energy_kwh / capacity).clamp(0.0, 1.0);
    }
}

/// The provisioned fleet, split by device class.
#[derive(Debug, Clone, Default)]
pub struct Fleet {
    pub ev_piles: Vec<Entity>,
    pub ess_units: Vec<Entity>,
}

impl Fleet {
    pub fn all(&self) -> impl Iterator<Item = Entity> + '_ {
        self.ev_piles.iter().chain(self.ess_units.iter()).copied()
    }
}

/// Create the reference fleet: 10 charging stations of 5 piles each plus
/// 100 storage units, with seeded random initial SOC for the piles.
pub fn provision_fleet(registry: &Registry, seed: u64) -> Fleet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut fleet = Fleet::default();

    let stations = 10;
    let piles_per_station = 5;
    for i in 0..stations * piles_per_station {
        let pile = registry.create_entity();
        let scheduled_kw = match i % 3 {
            0 => -5.0,
            1 => -3.5,
            _ => 0.0,
        };
        registry.attach(
            pile,
            DroopConfig {
                device: DeviceType::EvPile,
                base_power_kw: scheduled_kw,
                gain_kw_per_hz: 4.0,
                deadband_hz: 0.03,
                max_output_kw: 5.0,
                min_output_kw: -5.0,
                soc_min: 0.1,
                soc_max: 0.95,
            },
        );
        registry.attach(
            pile,
            PhysicalState {
                power_kw: scheduled_kw,
                soc: rng.random_range(0.25..0.90),
            },
        );
        fleet.ev_piles.push(pile);
    }
    info!(count = fleet.ev_piles.len(), "ev charging piles provisioned");

    let ess_units = 100;
    for _ in 0..ess_units {
        let ess = registry.create_entity();
        registry.attach(
            ess,
            DroopConfig {
                device: DeviceType::EssUnit,
                base_power_kw: 0.0,
                // 1 MW of response at 0.03 Hz past the deadband.
                gain_kw_per_hz: 1000.0 / 0.03,
                deadband_hz: 0.03,
                max_output_kw: 1000.0,
                min_output_kw: -1000.0,
                soc_min: 0.05,
                soc_max: 0.95,
            },
        );
        registry.attach(
            ess,
            PhysicalState {
                power_kw: 0.0,
                soc: 0.7,
            },
        );
        fleet.ess_units.push(ess);
    }
    info!(count = fleet.ess_units.len(), "storage units provisioned");

    fleet
}

/// Frequency oracle: publishes a [`FrequencyInfo`] every `step`,
/// aggregates the fleet power and appends one data-file row per step.
pub async fn frequency_oracle(
    ctx: SimContext,
    registry: Rc<Registry>,
    fleet: Fleet,
    disturbance_start_s: f64,
    step: SimDuration,
    mut recorder: Option<DataRecorder>,
) -> TaskResult {
    info!(
        sim_ms = ctx.now().as_millis(),
        disturbance_start_s,
        step_ms = step.as_millis(),
        "frequency oracle active"
    );
    let states = registry.kind::<PhysicalState>();

    loop {
        ctx.delay(step).await?;

        let sim_time_s = ctx.now().as_secs_f64();
        let relative_s = sim_time_s - disturbance_start_s;
        let deviation_hz = frequency_deviation(relative_s);
        ctx.trigger_event(
            FREQUENCY_UPDATE_EVENT,
            FrequencyInfo {
                sim_time_s,
                deviation_hz,
            },
        );

        let mut fleet_power_kw = 0.0;
        for device in fleet.all() {
            if let Some(state) = states.get(device) {
                fleet_power_kw += state.power_kw;
            }
        }

        if let Some(recorder) = recorder.as_mut() {
            if let Err(err) = recorder.append_row(&[
                format!("{:.0}", ctx.now().as_millis()),
                format!("{sim_time_s:.3}"),
                format!("{relative_s:.3}"),
                format!("{deviation_hz:.5}"),
                format!("{fleet_power_kw:.2}"),
            ]) {
                error!(error = %err, "failed to append frequency data row");
            }
        }
    }
}

/// Per-device frequency response: waits for oracle updates and, when the
/// deviation moved enough or enough time passed, integrates the SOC and
/// re-targets the device power.
pub async fn device_frequency_response(
    ctx: SimContext,
    registry: Rc<Registry>,
    device: Entity,
    name: String,
) -> TaskResult {
    let configs = registry.kind::<DroopConfig>();
    let states = registry.kind::<PhysicalState>();
    let Some(config) = configs.get(device).map(|c| *c) else {
        error!(device = %device, name, "missing droop config; response task exits");
        return Ok(());
    };
    if states.get(device).is_none() {
        error!(device = %device, name, "missing physical state; response task exits");
        return Ok(());
    }

    const FREQ_CHANGE_THRESHOLD_HZ: f64 = 0.005;
    const TIME_THRESHOLD_S: f64 = 0.5;

    let mut last_event_s = -1.0f64;
    let mut last_update_s = -1.0f64;
    let mut last_update_deviation_hz = 0.0f64;

    loop {
        let update = ctx
            .wait_for_event::<FrequencyInfo>(FREQUENCY_UPDATE_EVENT)
            .await?;

        // Stale or duplicate measurements are skipped outright.
        if update.sim_time_s <= last_event_s {
            continue;
        }
        last_event_s = update.sim_time_s;

        let first_update = last_update_s < 0.0;
        let dt_s = if first_update {
            0.0
        } else {
            (update.sim_time_s - last_update_s).max(0.0)
        };
        let moved_enough =
            (update.deviation_hz - last_update_deviation_hz).abs() > FREQ_CHANGE_THRESHOLD_HZ;
        if !(first_update || moved_enough || dt_s >= TIME_THRESHOLD_S) {
            continue;
        }

        // Borrow released before the next await.
        if let Some(mut state) = states.get_mut(device) {
            if !first_update {
                integrate_soc(&mut state, &config, dt_s);
            }
            state.power_kw = droop_target(&config, state.soc, update.deviation_hz);
        }
        last_update_s = update.sim_time_s;
        last_update_deviation_hz = update.deviation_hz;
    }
}

/// Background generator: comes online after a start-up time, then keeps
/// serving power-adjustment requests.
pub async fn generator(ctx: SimContext) -> TaskResult {
    info!(sim_ms = ctx.now().as_millis(), "generator start sequence initiated");
    ctx.delay(SimDuration::from_millis(1000)).await?;
    info!(sim_ms = ctx.now().as_millis(), "generator on grid and stable");
    ctx.trigger(GENERATOR_READY_EVENT);

    loop {
        ctx.wait_for_signal(POWER_ADJUST_REQUEST_EVENT).await?;
        info!(sim_ms = ctx.now().as_millis(), "power adjustment requested; adjusting");
        ctx.delay(SimDuration::from_millis(300)).await?;
        info!(sim_ms = ctx.now().as_millis(), "power output adjusted");
    }
}

/// Background load profile: applies an initial load once the generator
/// is ready, later a step change that also raises a stability concern.
pub async fn load_profile(ctx: SimContext) -> TaskResult {
    info!(sim_ms = ctx.now().as_millis(), "load waiting for generator ready");
    ctx.wait_for_signal(GENERATOR_READY_EVENT).await?;
    info!(sim_ms = ctx.now().as_millis(), "generator detected; applying initial load");
    ctx.delay(SimDuration::from_millis(500)).await?;
    ctx.trigger(LOAD_CHANGE_EVENT);

    ctx.delay(SimDuration::from_millis(10_000)).await?;
    info!(sim_ms = ctx.now().as_millis(), "major load step; raising stability concern");
    ctx.trigger(LOAD_CHANGE_EVENT);
    ctx.trigger(STABILITY_CONCERN_EVENT);
    Ok(())
}

/// Simulation time at which the frequency disturbance begins.
pub const DISTURBANCE_START_S: f64 = 5.0;

/// Wire up and run the VPP frequency-response scenario.
pub fn run_scenario(config: &SimulationConfig) -> Result<()> {
    let registry = Rc::new(Registry::new());
    let scheduler = Scheduler::new();

    let fleet = provision_fleet(&registry, config.random_seed);
    let recorder = DataRecorder::create(
        &config.data_directory,
        "vpp_frequency_response.tsv",
        &["sim_ms", "sim_s", "relative_s", "freq_dev_hz", "fleet_power_kw"],
    )
    .with_context(|| {
        format!(
            "creating vpp data file under {}",
            config.data_directory.display()
        )
    })?;

    spawn_vpp_agents(
        &scheduler,
        Rc::clone(&registry),
        fleet,
        SimDuration::from(config.oracle_step),
        Some(recorder),
    );

    let mut scheduler = scheduler;
    let deadline = SimTime::ZERO + SimDuration::from(config.duration);
    info!(deadline = %deadline, "starting vpp frequency-response scenario");
    if config.real_time {
        scheduler.run_real_time_until(deadline);
    } else {
        scheduler.run_until(deadline);
    }
    info!(final_sim_ms = scheduler.now().as_millis(), "vpp scenario finished");
    Ok(())
}

/// Spawn the oracle, every device-response task and the background
/// generator/load pair onto `scheduler`.
pub fn spawn_vpp_agents(
    scheduler: &Scheduler,
    registry: Rc<Registry>,
    fleet: Fleet,
    oracle_step: SimDuration,
    recorder: Option<DataRecorder>,
) {
    for (i, &pile) in fleet.ev_piles.iter().enumerate() {
        let registry = Rc::clone(&registry);
        scheduler
            .spawn(move |ctx| {
                device_frequency_response(ctx, registry, pile, format!("ev-pile-{i}"))
            })
            .detach();
    }
    for (i, &ess) in fleet.ess_units.iter().enumerate() {
        let registry = Rc::clone(&registry);
        scheduler
            .spawn(move |ctx| device_frequency_response(ctx, registry, ess, format!("ess-{i}")))
            .detach();
    }

    let oracle_registry = Rc::clone(&registry);
    scheduler
        .spawn(move |ctx| {
            frequency_oracle(
                ctx,
                oracle_registry,
                fleet,
                DISTURBANCE_START_S,
                oracle_step,
                recorder,
            )
        })
        .detach();

    scheduler.spawn(generator).detach();
    scheduler.spawn(load_profile).detach();
}
