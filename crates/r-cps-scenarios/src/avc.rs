//! ---
//! cps_section: "05-scenario-agents"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Reference co-simulation scenarios exercising the kernel, registry and topology."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! Automatic voltage control scenario.
//!
//! A sensor agent publishes a scripted sequence of voltage and load
//! samples; the AVC controller maps each voltage sample onto a control
//! band and recommends capacitor or tap actions; a load monitor watches
//! for high-load conditions. Runs in either virtual-time or wall-clock
//! paced mode.

use anyhow::Result;
use r_cps_common::SimulationConfig;
use r_cps_kernel::{Scheduler, SimContext, SimDuration, SimTime, TaskResult};
use tracing::{info, warn};

use crate::events::{LoadSample, VoltageSample, LOAD_CHANGE_EVENT_AVC, VOLTAGE_CHANGE_EVENT_AVC};

/// Control decision of the AVC controller for one voltage sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// Severe undervoltage: switch in the main capacitor bank and alarm.
    EmergencyBoost,
    /// Mild undervoltage: spare capacitors or tap-changer raise.
    TrimUp,
    /// Severe overvoltage: switch out the main capacitor bank and alarm.
    EmergencyShed,
    /// Mild overvoltage: shed capacitors or tap-changer lower.
    TrimDown,
    /// Voltage inside the normal band: keep monitoring.
    Hold,
}

/// Band mapping used by the controller. Thresholds in per-unit.
pub fn control_action(voltage_pu: f64) -> ControlAction {
    if voltage_pu < 0.90 {
        ControlAction::EmergencyBoost
    } else if voltage_pu < 0.95 {
        ControlAction::TrimUp
    } else if voltage_pu > 1.10 {
        ControlAction::EmergencyShed
    } else if voltage_pu > 1.05 {
        ControlAction::TrimDown
    } else {
        ControlAction::Hold
    }
}

/// High-load alarm threshold of the load monitor, in MW.
pub const HIGH_LOAD_ALARM_MW: f64 = 140.0;

/// Scripted measurement sequence: nominal state, load rise, voltage
/// dips, partial recovery, overshoot, settle.
pub async fn sensor_sequence(ctx: SimContext) -> TaskResult {
    info!(sim_ms = ctx.now().as_millis(), "avc sensor online; system at nominal state");

    ctx.delay(SimDuration::from_secs(1)).await?;
    publish_voltage(&ctx, 1.00);
    publish_load(&ctx, 100.0, "bus-a");

    ctx.delay(SimDuration::from_secs(4)).await?;
    publish_load(&ctx, 150.0, "bus-a");

    ctx.delay(SimDuration::from_secs(2)).await?;
    publish_voltage(&ctx, 0.93);

    ctx.delay(SimDuration::from_secs(5)).await?;
    publish_load(&ctx, 80.0, "bus-b");

    ctx.delay(SimDuration::from_secs(3)).await?;
    publish_voltage(&ctx, 0.88);

    ctx.delay(SimDuration::from_secs(5)).await?;
    publish_load(&ctx, 70.0, "bus-a");

    ctx.delay(SimDuration::from_secs(2)).await?;
    publish_voltage(&ctx, 0.97);

    ctx.delay(SimDuration::from_secs(3)).await?;
    publish_voltage(&ctx, 1.08);

    ctx.delay(SimDuration::from_secs(5)).await?;
    publish_voltage(&ctx, 1.01);

    ctx.delay(SimDuration::from_secs(5)).await?;
    info!(sim_ms = ctx.now().as_millis(), "avc sensor sequence complete");
    Ok(())
}

fn publish_voltage(ctx: &SimContext, voltage_pu: f64) {
    info!(sim_ms = ctx.now().as_millis(), voltage_pu, "voltage change detected");
    ctx.trigger_event(
        VOLTAGE_CHANGE_EVENT_AVC,
        VoltageSample {
            voltage_pu,
            at: ctx.now(),
        },
    );
}

fn publish_load(ctx: &SimContext, load_mw: f64, bus: &str) {
    info!(sim_ms = ctx.now().as_millis(), load_mw, bus, "load change detected");
    ctx.trigger_event(
        LOAD_CHANGE_EVENT_AVC,
        LoadSample {
            load_mw,
            bus: bus.to_owned(),
            at: ctx.now(),
        },
    );
}

/// AVC controller: consumes up to `max_events` voltage samples, decides
/// a control band per sample, then models a 300 ms actuation delay.
pub async fn avc_controller(ctx: SimContext, max_events: usize) -> TaskResult {
    info!(sim_ms = ctx.now().as_millis(), "avc controller online; waiting for voltage events");
    let mut handled = 0usize;
    while handled < max_events {
        let sample = ctx
            .wait_for_event::<VoltageSample>(VOLTAGE_CHANGE_EVENT_AVC)
            .await?;
        handled += 1;
        let action = control_action(sample.voltage_pu);
        info!(
            sim_ms = ctx.now().as_millis(),
            voltage_pu = sample.voltage_pu,
            measured_at = sample.at.as_millis(),
            handled,
            action = ?action,
            "avc control decision"
        );
        ctx.delay(SimDuration::from_millis(300)).await?;
    }
    info!(sim_ms = ctx.now().as_millis(), handled, "avc controller done");
    Ok(())
}

/// Load monitor: consumes up to `max_events` load samples and raises a
/// high-load alarm above [`HIGH_LOAD_ALARM_MW`].
pub async fn load_monitor(ctx: SimContext, max_events: usize) -> TaskResult {
    info!(sim_ms = ctx.now().as_millis(), "load monitor online; waiting for load events");
    let mut handled = 0usize;
    while handled < max_events {
        let sample = ctx
            .wait_for_event::<LoadSample>(LOAD_CHANGE_EVENT_AVC)
            .await?;
        handled += 1;
        if sample.load_mw > HIGH_LOAD_ALARM_MW {
            warn!(
                sim_ms = ctx.now().as_millis(),
                load_mw = sample.load_mw,
                bus = %sample.bus,
                "high load condition"
            );
        } else {
            info!(
                sim_ms = ctx.now().as_millis(),
                load_mw = sample.load_mw,
                bus = %sample.bus,
                "load level recorded"
            );
        }
    }
    info!(sim_ms = ctx.now().as_millis(), handled, "load monitor done");
    Ok(())
}

/// Wire up and run the AVC scenario for `config.duration`, free-running
/// or paced against the wall clock per `config.real_time`.
pub fn run_scenario(config: &SimulationConfig) -> Result<()> {
    let mut scheduler = Scheduler::new();
    scheduler.spawn(sensor_sequence).detach();
    scheduler.spawn(|ctx| avc_controller(ctx, 6)).detach();
    scheduler.spawn(|ctx| load_monitor(ctx, 4)).detach();

    let deadline = SimTime::ZERO + SimDuration::from(config.duration);
    info!(deadline = %deadline, real_time = config.real_time, "starting avc scenario");
    if config.real_time {
        scheduler.run_real_time_until(deadline);
    } else {
        scheduler.run_until(deadline);
    }
    info!(final_sim_ms = scheduler.now().as_millis(), "avc scenario finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_bands_match_the_operating_thresholds() {
        assert_eq!(control_action(0.88), ControlAction::EmergencyBoost);
        assert_eq!(control_action(0.93), ControlAction::TrimUp);
        assert_eq!(control_action(1.00), ControlAction::Hold);
        assert_eq!(control_action(1.08), ControlAction::TrimDown);
        assert_eq!(control_action(1.12), ControlAction::EmergencyShed);
        // Band edges stay in the milder band.
        assert_eq!(control_action(0.95), ControlAction::Hold);
        assert_eq!(control_action(1.05), ControlAction::Hold);
    }
}
