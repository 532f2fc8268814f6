//! End-to-End Test Framework for netsim
//!
//! Builds small networks, runs them to completion under a wall-clock bound
//! and inspects the aggregated results. Scenarios live in `tests/`.

pub mod fixtures;
pub mod framework;
pub mod validation;

pub use fixtures::*;
pub use framework::*;
pub use validation::*;
