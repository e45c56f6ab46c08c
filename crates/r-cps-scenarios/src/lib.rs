//! ---
//! cps_section: "05-scenario-agents"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Reference co-simulation scenarios exercising the kernel, registry and topology."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! Reference scenarios for the co-simulation kernel.
//!
//! Three families of agents exercise the platform end to end: automatic
//! voltage control ([`avc`]), virtual-power-plant primary frequency
//! response ([`frequency`]) and fault/protection behaviour — both the
//! relay-catalogue form ([`protection`]) and the logic-protection plus
//! network-reconfiguration form backed by the topology service
//! ([`reconfig`]).
//!
//! The agents define the event-id contract of the platform; a driver
//! that targets them must keep the integer ids in [`events`] unchanged.

pub mod avc;
pub mod events;
pub mod frequency;
pub mod protection;
pub mod reconfig;
pub mod recorder;
