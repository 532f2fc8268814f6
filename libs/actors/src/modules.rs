//! Module Attachment
//!
//! Sub-components attached to an actor by name, each with its own
//! enable / disable / pause lifecycle (the socket's heartbeat and traffic
//! listener are modules).

use netsim_types::{Result, SimError};
use std::collections::BTreeMap;

/// Module lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Enabled,
    Disabled,
    Paused,
}

/// Attachable sub-component
pub trait Module: Send {
    fn name(&self) -> &str;

    fn state(&self) -> ModuleState;

    /// Returns whether the state actually changed
    fn enable(&mut self) -> bool;

    fn disable(&mut self) -> bool;

    fn pause(&mut self) -> bool;
}

/// Per-actor module registry
#[derive(Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Box<dyn Module>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a module; names must be unique per actor
    pub fn attach(&mut self, module: Box<dyn Module>) -> Result<()> {
        let name = module.name().to_string();
        if self.modules.contains_key(&name) {
            return Err(SimError::duplicate("module", name));
        }
        self.modules.insert(name, module);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Module> {
        self.modules.get(name).map(|module| module.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Module + 'static)> {
        self.modules.get_mut(name).map(|module| module.as_mut())
    }

    pub fn state(&self, name: &str) -> Option<ModuleState> {
        self.get(name).map(|module| module.state())
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }

    /// Disable every module, used on actor teardown
    pub fn disable_all(&mut self) {
        for module in self.modules.values_mut() {
            module.disable();
        }
    }
}
