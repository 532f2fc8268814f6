//! Miner Controller
//!
//! Places devices on miners and keeps the handles of the started ones.
//! Placement is greedy: each device goes to the least-loaded miner, ties
//! broken by miner index, so N devices over M miners differ by at most one.

use crate::device::Device;
use crate::miner::{Miner, RunningMiner};
use crossbeam_channel::Sender;
use netsim_actors::Liveness;
use netsim_config::SimulationConfig;
use netsim_types::{Message, Result, SignalKind, SimError};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct MinerController {
    pending: Vec<Miner>,
    running: Vec<RunningMiner>,
    /// Device label → miner label
    placement: BTreeMap<String, String>,
}

impl MinerController {
    pub fn new(miners: usize) -> Self {
        Self {
            pending: (0..miners.max(1))
                .map(|index| Miner::new(format!("miner-{}", index)))
                .collect(),
            running: Vec::new(),
            placement: BTreeMap::new(),
        }
    }

    pub fn miner_count(&self) -> usize {
        self.pending.len() + self.running.len()
    }

    /// Place `device` on the least-loaded miner. Returns the miner label.
    pub fn place(&mut self, device: Device) -> Result<String> {
        let miner = self
            .pending
            .iter_mut()
            .min_by_key(|miner| miner.load())
            .ok_or_else(|| SimError::configuration("miners already started", Some("miners")))?;
        let label = device.label().to_string();
        debug!(device = %label, miner = %miner.label(), "Device placed");
        self.placement.insert(label, miner.label().to_string());
        miner.host(device);
        Ok(miner.label().to_string())
    }

    pub fn placement(&self) -> &BTreeMap<String, String> {
        &self.placement
    }

    /// Devices per miner, in miner order
    pub fn loads(&self) -> Vec<(String, usize)> {
        self.pending
            .iter()
            .map(|miner| (miner.label().to_string(), miner.load()))
            .collect()
    }

    pub fn start_all(&mut self, kernel: Sender<Message>, config: &SimulationConfig) -> Result<()> {
        for miner in std::mem::take(&mut self.pending) {
            let running = miner.start(kernel.clone(), config)?;
            self.running.push(running);
        }
        info!(miners = self.running.len(), "Miners started");
        Ok(())
    }

    /// Send `kind` to every started miner. Returns how many were reached.
    pub fn broadcast(&self, kind: SignalKind) -> usize {
        self.running
            .iter()
            .filter(|miner| miner.signal(kind.clone()).is_ok())
            .count()
    }

    pub fn liveness(&self) -> Vec<Liveness> {
        self.running.iter().map(|miner| miner.liveness().clone()).collect()
    }

    /// Join every miner thread. Returns the number detached.
    pub fn join_all(&mut self, timeout: Duration) -> usize {
        let mut detached = 0;
        for miner in &mut self.running {
            if !miner.join(timeout) {
                warn!(miner = %miner.label(), "Miner thread detached");
                detached += 1;
            }
        }
        detached
    }
}
