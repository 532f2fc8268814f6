//! Core E2E testing framework

use anyhow::{anyhow, Result};
use crossbeam_channel::bounded;
use netsim_config::{HeartbeatMode, SimulationConfig};
use netsim_kernel::{Simulation, SimulationBuilder, SimulationResult};
use netsim_network::DeviceRole;
use netsim_types::PortKind;
use std::sync::Once;
use std::time::{Duration, Instant};
use tracing::info;

static TRACING: Once = Once::new();

/// Install a test subscriber once per test binary. `RUST_LOG` overrides
/// the default `warn` level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Configuration tuned for fast scenarios: manual heartbeat, short polls
pub fn test_config() -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.heartbeat.mode = HeartbeatMode::Manual;
    config.heartbeat.window_ms = 100;
    config.timing.request_timeout_ms = 1_000;
    config.timing.watcher_interval_ms = 10;
    config.timing.poll_ms = 10;
    config.timing.drain_ms = 20;
    config.timing.join_timeout_ms = 200;
    config.timing.listener_timeout_ms = 500;
    config
}

/// Builder with ordinary devices `labels` chained by `kind` channels of
/// length 1
pub fn line(
    config: SimulationConfig,
    kind: PortKind,
    labels: &[&str],
) -> Result<SimulationBuilder> {
    let mut builder = SimulationBuilder::new(config);
    for label in labels {
        builder.add_device(label, DeviceRole::Ordinary)?;
    }
    for pair in labels.windows(2) {
        builder.add_channel(kind, pair[0], pair[1], 1.0)?;
    }
    Ok(builder)
}

/// Run `simulation` on its own thread, failing if it has not finished
/// within `limit`
pub fn run_bounded(simulation: Simulation, limit: Duration) -> Result<SimulationResult> {
    init_tracing();
    let started = Instant::now();
    let (tx, rx) = bounded(1);
    std::thread::Builder::new()
        .name("simulation".into())
        .spawn(move || {
            let _ = tx.send(simulation.run());
        })?;

    let result = rx
        .recv_timeout(limit)
        .map_err(|_| anyhow!("simulation did not finish within {:?}", limit))??;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Scenario finished");
    Ok(result)
}
