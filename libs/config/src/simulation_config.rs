//! Simulation Configuration Module
//!
//! Loads the simulation configuration from an optional TOML file with
//! `NETSIM_` environment overrides, e.g. `NETSIM_HEARTBEAT__INTERVAL_MS=200`.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Main simulation configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of miners hosting device shards, 0 runs one
    pub miners: usize,
    pub heartbeat: HeartbeatConfig,
    pub ports: PortConfig,
    pub timing: TimingConfig,
    pub routing: RoutingConfig,
}

/// How the heartbeat loop is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatMode {
    /// Jittered periodic ping rounds
    Periodic,
    /// One round per `RefreshHeartbeat` request
    Manual,
    /// No heartbeat thread
    Disabled,
}

/// Heartbeat settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub mode: HeartbeatMode,
    pub interval_ms: u64,
    pub window_ms: u64,
    pub jitter: f64,
}

/// Port pool capacities per device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub classic_capacity: usize,
    pub quantum_capacity: usize,
}

/// Timeouts and poll intervals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub request_timeout_ms: u64,
    pub response_grace_ms: u64,
    pub watcher_interval_ms: u64,
    pub poll_ms: u64,
    pub join_timeout_ms: u64,
    pub drain_ms: u64,
    pub listener_timeout_ms: u64,
    /// 0 disables the global timeout
    pub simulation_timeout_ms: u64,
}

/// Routing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub forwarding: bool,
    pub max_hops: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            miners: defaults::placement::MINERS,
            heartbeat: HeartbeatConfig::default(),
            ports: PortConfig::default(),
            timing: TimingConfig::default(),
            routing: RoutingConfig::default(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            mode: HeartbeatMode::Periodic,
            interval_ms: defaults::heartbeat::INTERVAL_MS,
            window_ms: defaults::heartbeat::WINDOW_MS,
            jitter: defaults::heartbeat::JITTER,
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            classic_capacity: defaults::ports::CLASSIC_CAPACITY,
            quantum_capacity: defaults::ports::QUANTUM_CAPACITY,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: defaults::timing::REQUEST_TIMEOUT_MS,
            response_grace_ms: defaults::timing::RESPONSE_GRACE_MS,
            watcher_interval_ms: defaults::timing::WATCHER_INTERVAL_MS,
            poll_ms: defaults::timing::POLL_MS,
            join_timeout_ms: defaults::timing::JOIN_TIMEOUT_MS,
            drain_ms: defaults::timing::DRAIN_MS,
            listener_timeout_ms: defaults::timing::LISTENER_TIMEOUT_MS,
            simulation_timeout_ms: defaults::timing::SIMULATION_TIMEOUT_MS,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            forwarding: defaults::routing::FORWARDING,
            max_hops: defaults::routing::MAX_HOPS,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl TimingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn response_grace(&self) -> Duration {
        Duration::from_millis(self.response_grace_ms)
    }

    pub fn watcher_interval(&self) -> Duration {
        Duration::from_millis(self.watcher_interval_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }

    pub fn listener_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_timeout_ms)
    }

    pub fn simulation_timeout(&self) -> Option<Duration> {
        (self.simulation_timeout_ms > 0).then(|| Duration::from_millis(self.simulation_timeout_ms))
    }
}

impl SimulationConfig {
    /// Load configuration from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading simulation config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        // Override with environment variables (NETSIM_ prefix)
        builder = builder.add_source(
            Environment::with_prefix("NETSIM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: SimulationConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(?config, "Simulation config loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SimulationConfig = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Miners actually started
    pub fn miner_count(&self) -> usize {
        self.miners.max(1)
    }

    /// Render the effective configuration
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.ports.classic_capacity == 0 && self.ports.quantum_capacity == 0 {
            bail!("ports: at least one port pool must be non-empty");
        }
        if !(0.0..1.0).contains(&self.heartbeat.jitter) {
            bail!("heartbeat.jitter must be in [0, 1), got {}", self.heartbeat.jitter);
        }
        if self.heartbeat.mode == HeartbeatMode::Periodic
            && self.heartbeat.window_ms >= self.heartbeat.interval_ms
        {
            bail!(
                "heartbeat.window_ms ({}) must be shorter than heartbeat.interval_ms ({})",
                self.heartbeat.window_ms,
                self.heartbeat.interval_ms
            );
        }
        if self.timing.poll_ms == 0 || self.timing.watcher_interval_ms == 0 {
            bail!("timing.poll_ms and timing.watcher_interval_ms must be positive");
        }
        if self.timing.request_timeout_ms == 0 {
            bail!("timing.request_timeout_ms must be positive");
        }
        Ok(())
    }
}

/// Convenience function to load configuration with defaults
pub fn load_config(path: Option<&Path>) -> Result<SimulationConfig> {
    SimulationConfig::load(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_base_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("simulation.toml");

        let config_content = r#"
miners = 3

[heartbeat]
mode = "manual"
window_ms = 80

[ports]
classic_capacity = 2

[routing]
forwarding = false
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = SimulationConfig::load(Some(&config_path)).unwrap();

        assert_eq!(config.miners, 3);
        assert_eq!(config.heartbeat.mode, HeartbeatMode::Manual);
        assert_eq!(config.heartbeat.window(), Duration::from_millis(80));
        assert_eq!(config.ports.classic_capacity, 2);
        // Unset values fall back to defaults
        assert_eq!(config.ports.quantum_capacity, defaults::ports::QUANTUM_CAPACITY);
        assert!(!config.routing.forwarding);
        assert_eq!(config.routing.max_hops, defaults::routing::MAX_HOPS);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(SimulationConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_validate_rejects_window_longer_than_interval() {
        let result = SimulationConfig::from_toml_str(
            r#"
[heartbeat]
interval_ms = 100
window_ms = 100
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_miners_runs_one() {
        let config = SimulationConfig::from_toml_str("miners = 0").unwrap();
        assert_eq!(config.miners, 0);
        assert_eq!(config.miner_count(), 1);
    }

    #[test]
    fn test_manual_mode_ignores_window_check() {
        let config = SimulationConfig::from_toml_str(
            r#"
[heartbeat]
mode = "manual"
interval_ms = 10
window_ms = 50
"#,
        )
        .unwrap();
        assert_eq!(config.heartbeat.mode, HeartbeatMode::Manual);
    }

    #[test]
    fn test_simulation_timeout_zero_disables() {
        let config = SimulationConfig::default();
        assert!(config.timing.simulation_timeout().is_none());

        let mut config = SimulationConfig::default();
        config.timing.simulation_timeout_ms = 1500;
        assert_eq!(config.timing.simulation_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = SimulationConfig::default();
        let rendered = config.to_toml_string().unwrap();
        let parsed = SimulationConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
