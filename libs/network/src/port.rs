//! Ports
//!
//! A port is a connection endpoint owned by exactly one socket.
//! `connected == false` with a channel still bound is soft-unconnected and
//! may be reconnected; no channel at all is hard-unconnected.

use crate::channel::ChannelEnd;
use netsim_types::{DeviceIdentity, Packet, PortRef, PortSnapshot, Result, SimError};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Port {
    reference: PortRef,
    active: bool,
    connected: bool,
    channel: Option<ChannelEnd>,
    target: Option<DeviceIdentity>,
    latency: Option<Duration>,
}

impl Port {
    pub fn new(reference: PortRef) -> Self {
        Self {
            reference,
            active: false,
            connected: false,
            channel: None,
            target: None,
            latency: None,
        }
    }

    pub fn reference(&self) -> PortRef {
        self.reference
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_bound(&self) -> bool {
        self.channel.is_some()
    }

    /// Unconnected and unbound, claimable by `connect`
    pub fn is_free(&self) -> bool {
        !self.connected && self.channel.is_none()
    }

    /// Active, connected and bound
    pub fn is_usable(&self) -> bool {
        self.active && self.connected && self.channel.is_some()
    }

    pub fn channel(&self) -> Option<&ChannelEnd> {
        self.channel.as_ref()
    }

    pub fn target(&self) -> Option<&DeviceIdentity> {
        self.target.as_ref()
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    pub(crate) fn bind(&mut self, end: ChannelEnd) {
        self.target = Some(end.peer().clone());
        self.channel = Some(end);
        self.connected = true;
        self.active = true;
    }

    pub(crate) fn set_target(&mut self, target: Option<DeviceIdentity>) {
        self.target = target;
    }

    pub(crate) fn set_latency(&mut self, latency: Duration) {
        self.latency = Some(latency);
    }

    /// Returns whether the flag changed
    pub(crate) fn set_active(&mut self, active: bool) -> bool {
        std::mem::replace(&mut self.active, active) != active
    }

    pub(crate) fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Clear connection, target and latency; `hard` also releases the channel
    pub(crate) fn release(&mut self, hard: bool) -> Option<ChannelEnd> {
        self.connected = false;
        self.target = None;
        self.latency = None;
        if hard {
            self.channel.take()
        } else {
            None
        }
    }

    /// Transmit through the bound channel. Returns `Ok(false)` on physical
    /// loss.
    pub fn send(&self, packet: Packet) -> Result<bool> {
        if !self.active {
            return Err(SimError::port_unavailable(self.reference, "port is inactive"));
        }
        if !self.connected {
            return Err(SimError::port_unavailable(self.reference, "port is unconnected"));
        }
        match &self.channel {
            Some(end) => end.transmit(packet),
            None => Err(SimError::port_unavailable(self.reference, "no channel bound")),
        }
    }

    pub fn snapshot(&self) -> PortSnapshot {
        PortSnapshot {
            port: self.reference,
            active: self.active,
            connected: self.connected,
            bound: self.channel.is_some(),
            target: self.target.clone(),
            latency: self.latency,
        }
    }
}
