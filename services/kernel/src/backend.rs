//! Backend Collaborator
//!
//! Qubit operations are opaque to the simulator: applications ask the
//! kernel, the kernel calls the backend and answers with its reply. The
//! [`BitBackend`] stand-in models each qubit as a classical bit with
//! probabilistic gates, enough to drive traffic and error channels.

use netsim_types::{BackendCall, BackendReply, QubitHandle, Result, SimError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::collections::HashMap;
use tracing::trace;

pub trait Backend: Send {
    fn allocate(&mut self, count: usize, options: &Value) -> Result<Vec<QubitHandle>>;

    fn measure(&mut self, handles: &[QubitHandle], options: &Value) -> Result<Vec<u8>>;

    fn apply_gate(
        &mut self,
        gate: &str,
        args: &[f64],
        handles: &[QubitHandle],
        options: &Value,
    ) -> Result<()>;

    /// Apply a noise channel; returns the handles that survived
    fn apply_channel_error(
        &mut self,
        handles: &[QubitHandle],
        probability: f64,
    ) -> Result<Vec<QubitHandle>>;

    fn reset(&mut self, handles: &[QubitHandle]) -> Result<()>;

    /// Dispatch one call from the kernel loop
    fn call(&mut self, call: BackendCall) -> Result<BackendReply> {
        match call {
            BackendCall::Allocate { count, options } => {
                self.allocate(count, &options).map(BackendReply::Handles)
            }
            BackendCall::Measure { handles, options } => {
                self.measure(&handles, &options).map(BackendReply::Measurements)
            }
            BackendCall::ApplyGate {
                gate,
                args,
                handles,
                options,
            } => self
                .apply_gate(&gate, &args, &handles, &options)
                .map(|_| BackendReply::Done),
            BackendCall::ApplyChannelError { handles, probability } => self
                .apply_channel_error(&handles, probability)
                .map(BackendReply::Handles),
            BackendCall::Reset { handles } => self.reset(&handles).map(|_| BackendReply::Done),
        }
    }
}

/// Bit-level stand-in backend
#[derive(Debug)]
pub struct BitBackend {
    next: u64,
    bits: HashMap<QubitHandle, u8>,
    rng: StdRng,
}

impl Default for BitBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BitBackend {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            next: 0,
            bits: HashMap::new(),
            rng,
        }
    }

    pub fn allocated(&self) -> usize {
        self.bits.len()
    }

    fn bit_mut(&mut self, handle: QubitHandle) -> Result<&mut u8> {
        self.bits
            .get_mut(&handle)
            .ok_or_else(|| SimError::backend(format!("unknown qubit {}", handle.0)))
    }
}

impl Backend for BitBackend {
    fn allocate(&mut self, count: usize, _options: &Value) -> Result<Vec<QubitHandle>> {
        let handles: Vec<QubitHandle> = (0..count)
            .map(|_| {
                self.next += 1;
                QubitHandle(self.next)
            })
            .collect();
        for handle in &handles {
            self.bits.insert(*handle, 0);
        }
        trace!(count, "Qubits allocated");
        Ok(handles)
    }

    fn measure(&mut self, handles: &[QubitHandle], _options: &Value) -> Result<Vec<u8>> {
        handles
            .iter()
            .map(|handle| self.bit_mut(*handle).map(|bit| *bit))
            .collect()
    }

    fn apply_gate(
        &mut self,
        gate: &str,
        args: &[f64],
        handles: &[QubitHandle],
        _options: &Value,
    ) -> Result<()> {
        // Probability of flipping each bit
        let flip = match gate {
            "x" | "X" => 1.0,
            "i" | "I" | "z" | "Z" => 0.0,
            "h" | "H" => 0.5,
            "rx" | "RX" => {
                let theta = args
                    .first()
                    .copied()
                    .ok_or_else(|| SimError::backend("rx needs an angle"))?;
                (theta / 2.0).sin().powi(2).clamp(0.0, 1.0)
            }
            other => return Err(SimError::backend(format!("unsupported gate {}", other))),
        };
        for handle in handles {
            let flipped = self.rng.gen_bool(flip);
            let bit = self.bit_mut(*handle)?;
            if flipped {
                *bit ^= 1;
            }
        }
        Ok(())
    }

    fn apply_channel_error(
        &mut self,
        handles: &[QubitHandle],
        probability: f64,
    ) -> Result<Vec<QubitHandle>> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(SimError::backend(format!("invalid error probability {}", probability)));
        }
        for handle in handles {
            let flip = self.rng.gen_bool(probability);
            let bit = self.bit_mut(*handle)?;
            if flip {
                *bit ^= 1;
            }
        }
        Ok(handles.to_vec())
    }

    fn reset(&mut self, handles: &[QubitHandle]) -> Result<()> {
        for handle in handles {
            *self.bit_mut(*handle)? = 0;
        }
        Ok(())
    }
}
