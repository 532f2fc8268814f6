//! Default values
//!
//! Defaults used when a configuration file or environment override does not
//! set a value. Nothing here is mutable at runtime; the loaded
//! `SimulationConfig` is threaded through constructors.

/// Process placement defaults
pub mod placement {
    /// Number of miners hosting device shards
    pub const MINERS: usize = 2;
}

/// Heartbeat defaults
pub mod heartbeat {
    /// Period between ping rounds (milliseconds)
    pub const INTERVAL_MS: u64 = 500;

    /// Pong collection window (milliseconds)
    pub const WINDOW_MS: u64 = 150;

    /// Relative jitter applied to each period
    pub const JITTER: f64 = 0.1;
}

/// Port pool defaults
pub mod ports {
    pub const CLASSIC_CAPACITY: usize = 8;
    pub const QUANTUM_CAPACITY: usize = 8;
}

/// Timing defaults
pub mod timing {
    /// Correlated request wait (milliseconds)
    pub const REQUEST_TIMEOUT_MS: u64 = 2_000;

    /// How long unmatched responses are kept for late readers (milliseconds)
    pub const RESPONSE_GRACE_MS: u64 = 5_000;

    /// Watcher poll interval (milliseconds)
    pub const WATCHER_INTERVAL_MS: u64 = 50;

    /// Loop receive timeout used to check cancellation (milliseconds)
    pub const POLL_MS: u64 = 20;

    /// Wait for a child thread to exit before detaching it (milliseconds)
    pub const JOIN_TIMEOUT_MS: u64 = 1_000;

    /// Idle period granted to static system applications during device teardown
    pub const DRAIN_MS: u64 = 20;

    /// Listener decision wait in interrupt mode (milliseconds)
    pub const LISTENER_TIMEOUT_MS: u64 = 1_000;

    /// Global simulation timeout, 0 disables it
    pub const SIMULATION_TIMEOUT_MS: u64 = 0;
}

/// Routing defaults
pub mod routing {
    /// Relay packets not addressed to this device through the routing layer
    pub const FORWARDING: bool = true;

    /// Drop counter for packets in flight
    pub const MAX_HOPS: u32 = 16;
}
