//! ---
//! cps_section: "01-platform-foundation"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Shared configuration and logging primitives for the co-simulation workspace."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! Shared primitives for the R-CPS co-simulation workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the scenario driver and the library crates' test suites.

pub mod config;
pub mod logging;

pub use config::{AppConfig, LoggingConfig, SimulationConfig};
pub use logging::{init_tracing, LogFormat};
