//! Result validation utilities for E2E tests

use anyhow::{anyhow, Result};
use netsim_kernel::SimulationResult;
use netsim_types::ActorState;
use serde_json::Value;

/// Exit codes dumped by an application
pub fn exit_codes(result: &SimulationResult, device: &str, app: &str) -> Vec<i64> {
    result
        .channel(device, app)
        .iter()
        .filter_map(|record| record.get("exit_code").and_then(Value::as_i64))
        .collect()
}

/// Packets recorded by a receiver fixture, timeouts excluded
pub fn received<'a>(result: &'a SimulationResult, device: &str, app: &str) -> Vec<&'a Value> {
    result
        .channel(device, app)
        .iter()
        .filter(|record| record.get("timeout").is_none())
        .collect()
}

/// Teardown record of a device
pub fn device_log<'a>(result: &'a SimulationResult, device: &str) -> Result<&'a Value> {
    result
        .channel(device, "device")
        .last()
        .ok_or_else(|| anyhow!("device {} left no teardown record", device))
}

/// Every device reported `Stopped`
pub fn assert_all_stopped(result: &SimulationResult, devices: &[&str]) -> Result<()> {
    for device in devices {
        match result.device_states.get(*device) {
            Some(ActorState::Stopped) => {}
            other => return Err(anyhow!("device {} ended in {:?}", device, other)),
        }
    }
    Ok(())
}
