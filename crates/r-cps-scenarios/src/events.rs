//! ---
//! cps_section: "05-scenario-agents"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Reference co-simulation scenarios exercising the kernel, registry and topology."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! Global event-id table and event payloads shared by the scenarios.
//!
//! Event ids are assigned once, here, for the whole platform. Publishers
//! and subscribers must agree on the payload type per id; the kernel
//! enforces that agreement at delivery time.

use r_cps_kernel::{EventId, SimTime};
use r_cps_registry::Entity;

// Generic simulation events.
pub const GENERATOR_READY_EVENT: EventId = 1;
pub const LOAD_CHANGE_EVENT: EventId = 2;
pub const BREAKER_OPENED_EVENT: EventId = 6;
pub const STABILITY_CONCERN_EVENT: EventId = 7;
pub const LOAD_SHED_REQUEST_EVENT: EventId = 8;
pub const POWER_ADJUST_REQUEST_EVENT: EventId = 9;

// Relay-protection scenario.
pub const FAULT_INFO_EVENT: EventId = 100;
pub const ENTITY_TRIP_EVENT: EventId = 101;

// Frequency / VPP scenario.
pub const FREQUENCY_UPDATE_EVENT: EventId = 200;

// Logic-protection and reconfiguration scenario.
pub const LOGIC_FAULT_EVENT: EventId = 300;
pub const LOGIC_BREAKER_TRIP_COMMAND_EVENT: EventId = 301;
pub const LOGIC_BREAKER_STATUS_CHANGED_EVENT: EventId = 302;

// AVC scenario keeps its own id range to avoid collisions with the rest
// of the platform.
pub const VOLTAGE_CHANGE_EVENT_AVC: EventId = 10_000;
pub const LOAD_CHANGE_EVENT_AVC: EventId = 10_001;

/// Parameters of a primary-system fault as seen by the relays.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultInfo {
    /// Fault current in kA.
    pub current_ka: f64,
    /// Voltage at the fault (pre-fault nominal or residual), in kV.
    pub voltage_kv: f64,
    /// Loop impedance seen from the measuring point, in ohms. Zero means
    /// "not measured"; see [`FaultInfo::with_computed_impedance`].
    pub impedance_ohm: f64,
    /// Distance to the fault from the measuring point, in km.
    pub distance_km: f64,
    /// The faulted piece of equipment, when known.
    pub faulty_entity: Option<Entity>,
}

impl FaultInfo {
    /// Fill in `impedance_ohm` from `Z = V / I` when it was not measured
    /// directly. A deliberately crude estimate; the relays only compare
    /// it against zone reaches.
    pub fn with_computed_impedance(mut self) -> Self {
        if self.impedance_ohm == 0.0 && self.voltage_kv > 0.0 && self.current_ka > 0.0 {
            self.impedance_ohm = (self.voltage_kv * 1000.0) / (self.current_ka * 1000.0);
        }
        self
    }
}

/// System-frequency update broadcast by the frequency oracle.
#[derive(Debug, Clone, Copy)]
pub struct FrequencyInfo {
    /// Simulation time of the measurement, in seconds.
    pub sim_time_s: f64,
    /// Deviation from nominal frequency in Hz; negative is underfrequency.
    pub deviation_hz: f64,
}

/// Voltage measurement published by the AVC sensor.
#[derive(Debug, Clone, Copy)]
pub struct VoltageSample {
    /// Per-unit voltage.
    pub voltage_pu: f64,
    pub at: SimTime,
}

/// Load measurement published by the AVC sensor.
#[derive(Debug, Clone)]
pub struct LoadSample {
    pub load_mw: f64,
    /// Identifier of the bus or area where the load changed.
    pub bus: String,
    pub at: SimTime,
}

/// A permanent fault appearing on a line in the logic-protection model.
#[derive(Debug, Clone, Copy)]
pub struct LogicFaultInfo {
    pub faulted_line: Entity,
}

/// Trip order addressed to one breaker.
#[derive(Debug, Clone, Copy)]
pub struct BreakerCommand {
    pub breaker: Entity,
}

/// A breaker position change, published after the operating time.
#[derive(Debug, Clone, Copy)]
pub struct BreakerStatus {
    pub breaker: Entity,
    pub is_open: bool,
}
