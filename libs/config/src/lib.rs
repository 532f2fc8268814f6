//! # netsim Configuration
//!
//! Centralized configuration and defaults for the simulator.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use netsim_config::{load_config, HeartbeatMode};
//!
//! let config = load_config(None).expect("configuration");
//! if config.heartbeat.mode == HeartbeatMode::Periodic {
//!     println!("pinging every {:?}", config.heartbeat.interval());
//! }
//! ```

pub mod defaults;
pub mod simulation_config;

pub use simulation_config::{
    load_config, HeartbeatConfig, HeartbeatMode, PortConfig, RoutingConfig, SimulationConfig,
    TimingConfig,
};
