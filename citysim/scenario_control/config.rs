use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::collaborators::SocRange;

/// Orchestrator settings, loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrchestratorConfig {
    /// Progressive clock settings.
    #[serde(default)]
    pub clock: ClockSettings,
    /// Quota maintainer settings.
    #[serde(default)]
    pub quota: QuotaSettings,
    /// Scenario execution settings.
    #[serde(default)]
    pub scenarios: ScenarioSettings,
    /// Simulation backend endpoint.
    #[serde(default)]
    pub backend: BackendSettings,
    /// Log and event sinks.
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl OrchestratorConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading orchestrator config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.clock.tick_period_ms == 0 {
            bail!("clock.tick_period_ms must be positive");
        }
        if self.clock.initial_hour > 23 || self.clock.initial_minute > 59 {
            bail!(
                "invalid initial clock {}:{:02}",
                self.clock.initial_hour,
                self.clock.initial_minute
            );
        }
        if self.quota.interval_ms == 0 {
            bail!("quota.interval_ms must be positive");
        }
        let soc = (self.quota.min_soc, self.quota.max_soc);
        if !(0.0..=100.0).contains(&soc.0) || !(0.0..=100.0).contains(&soc.1) || soc.0 > soc.1 {
            bail!("invalid SOC bounds: {} to {}", soc.0, soc.1);
        }
        if self.backend.base_url.trim().is_empty() {
            bail!("backend.base_url must not be empty");
        }
        Ok(())
    }

    /// Tick period of the progressive clock.
    #[must_use]
    pub const fn tick_period(&self) -> Duration {
        Duration::from_millis(self.clock.tick_period_ms)
    }

    /// Interval between quota checks.
    #[must_use]
    pub const fn quota_interval(&self) -> Duration {
        Duration::from_millis(self.quota.interval_ms)
    }

    /// Delay before an active scenario key is released.
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_millis(self.scenarios.grace_period_ms)
    }

    /// SOC bounds used for every spawn.
    #[must_use]
    pub const fn soc_range(&self) -> SocRange {
        SocRange {
            min: self.quota.min_soc,
            max: self.quota.max_soc,
        }
    }
}

/// Progressive clock settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClockSettings {
    /// Real milliseconds per simulated minute.
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,
    /// Hour the session starts at.
    #[serde(default = "default_initial_hour")]
    pub initial_hour: u8,
    /// Minute the session starts at.
    #[serde(default)]
    pub initial_minute: u8,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_period_ms(),
            initial_hour: default_initial_hour(),
            initial_minute: 0,
        }
    }
}

/// Quota maintainer settings.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaSettings {
    /// Real milliseconds between checks.
    #[serde(default = "default_quota_interval_ms")]
    pub interval_ms: u64,
    /// Minimum state of charge for spawned EVs, percent.
    #[serde(default = "default_min_soc")]
    pub min_soc: f64,
    /// Maximum state of charge for spawned EVs, percent.
    #[serde(default = "default_max_soc")]
    pub max_soc: f64,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_quota_interval_ms(),
            min_soc: default_min_soc(),
            max_soc: default_max_soc(),
        }
    }
}

/// Scenario execution settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioSettings {
    /// Milliseconds an active key stays blocked after a successful change.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Temperature assumed before any change is made.
    #[serde(default = "default_initial_temperature_f")]
    pub initial_temperature_f: i32,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            initial_temperature_f: default_initial_temperature_f(),
        }
    }
}

/// Simulation backend endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSettings {
    /// Base URL of the simulation API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Log and event sinks.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    /// JSON-lines log file; logging to file is off when absent.
    #[serde(default = "default_log_path")]
    pub log_path: Option<PathBuf>,
    /// Durable event mirror; off when absent.
    #[serde(default)]
    pub event_log_path: Option<PathBuf>,
    /// In-memory event backlog size.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            event_log_path: None,
            event_capacity: default_event_capacity(),
        }
    }
}

const fn default_tick_period_ms() -> u64 {
    1_000
}

const fn default_initial_hour() -> u8 {
    8
}

const fn default_quota_interval_ms() -> u64 {
    5_000
}

const fn default_min_soc() -> f64 {
    20.0
}

const fn default_max_soc() -> f64 {
    80.0
}

const fn default_grace_period_ms() -> u64 {
    5_000
}

const fn default_initial_temperature_f() -> i32 {
    75
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".into()
}

const fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_log_path() -> Option<PathBuf> {
    Some(PathBuf::from("logs/orchestrator/scenario_control.log.jsonl"))
}

const fn default_event_capacity() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_document_uses_defaults() {
        let config = OrchestratorConfig::from_toml("").unwrap();
        assert_eq!(config.tick_period(), Duration::from_secs(1));
        assert_eq!(config.quota_interval(), Duration::from_secs(5));
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        assert_eq!(config.clock.initial_hour, 8);
        assert_eq!(config.scenarios.initial_temperature_f, 75);
    }

    #[test]
    fn loads_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("orchestrator.toml");
        std::fs::write(
            &path,
            "[clock]\ntick_period_ms = 250\ninitial_hour = 17\n\n[quota]\nmin_soc = 35.0\n",
        )
        .unwrap();
        let config = OrchestratorConfig::load(&path).unwrap();
        assert_eq!(config.clock.tick_period_ms, 250);
        assert_eq!(config.clock.initial_hour, 17);
        assert!((config.soc_range().min - 35.0).abs() < f64::EPSILON);
        assert!((config.soc_range().max - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn shipped_sample_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../data/orchestrator.toml");
        let config = OrchestratorConfig::load(path).unwrap();
        assert!(config.telemetry.event_log_path.is_some());
        assert_eq!(config.backend.request_timeout_ms, 10_000);
    }

    #[test]
    fn rejects_invalid_settings() {
        assert!(OrchestratorConfig::from_toml("[clock]\ntick_period_ms = 0\n").is_err());
        assert!(OrchestratorConfig::from_toml("[clock]\ninitial_hour = 24\n").is_err());
        assert!(
            OrchestratorConfig::from_toml("[quota]\nmin_soc = 90.0\nmax_soc = 10.0\n").is_err()
        );
        assert!(OrchestratorConfig::from_toml("[quota]\ninterval_ms = 0\n").is_err());
    }
}
