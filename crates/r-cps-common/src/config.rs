//! ---
//! cps_section: "01-platform-foundation"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Shared configuration and logging primitives for the co-simulation workspace."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_duration_ms() -> Duration {
    Duration::from_millis(70_000)
}

fn default_oracle_step_ms() -> Duration {
    Duration::from_millis(20)
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("target/sim-data")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_random_seed() -> u64 {
    0xC0515Du64
}

/// Primary configuration object for the scenario driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "R_CPS_CONFIG";

    /// Load configuration from disk, respecting the `R_CPS_CONFIG` override.
    ///
    /// The first readable candidate wins; when nothing is found the
    /// built-in defaults apply so the driver still runs out of the box.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            let path = PathBuf::from(env_path);
            return Self::from_path(&path)
                .with_context(|| format!("loading config from {}", path.display()));
        }
        for candidate in candidates {
            let path = candidate.as_ref();
            if path.is_file() {
                return Self::from_path(path)
                    .with_context(|| format!("loading config from {}", path.display()));
            }
            debug!(path = %path.display(), "config candidate not present");
        }
        Ok(Self::default())
    }

    fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|err| anyhow!("invalid config {}: {err}", path.display()))
    }
}

/// Scenario execution parameters shared by all simulation entry points.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Total virtual duration of a scenario run.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_duration_ms", rename = "duration_ms")]
    pub duration: Duration,
    /// Pace virtual time against the wall clock instead of free-running.
    #[serde(default)]
    pub real_time: bool,
    /// Update step of the frequency oracle agent.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_oracle_step_ms", rename = "oracle_step_ms")]
    pub oracle_step: Duration,
    /// Seed for reproducible fleet initialisation.
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    /// Directory for tab-separated scenario data files.
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration: default_duration_ms(),
            real_time: false,
            oracle_step: default_oracle_step_ms(),
            random_seed: default_random_seed(),
            data_directory: default_data_directory(),
        }
    }
}

/// Logging sink configuration consumed by [`crate::logging::init_tracing`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Skip the rolling file layer entirely (used by tests).
    #[serde(default)]
    pub console_only: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            console_only: false,
        }
    }
}
