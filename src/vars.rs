//! Stored variable values with per-host overrides.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::reference::Reference;
use indexmap::IndexMap;

/// A variable assignment carried by a flight plan line action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableAssignment {
    pub variable: String,
    pub value: String,
}

/// Storage for variable values.
///
/// A variable may hold one global value and any number of host-specific
/// values. Lookup for a host falls back to the global value when no
/// host-specific one exists.
#[derive(Default)]
pub struct VariableStore {
    global: RwLock<IndexMap<String, String>>,
    per_host: RwLock<IndexMap<Reference, IndexMap<String, String>>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the global value of a variable, creating it if needed.
    pub fn assign_global(&self, variable: impl Into<String>, value: impl Into<String>) {
        self.global.write().insert(variable.into(), value.into());
    }

    /// Set a host-specific value of a variable, creating it if needed.
    pub fn assign(
        &self,
        host: &Reference,
        variable: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.per_host
            .write()
            .entry(host.clone())
            .or_default()
            .insert(variable.into(), value.into());
    }

    /// Resolve one variable for a host, host-specific value first.
    pub fn get(&self, host: &Reference, variable: &str) -> Option<String> {
        if let Some(values) = self.per_host.read().get(host) {
            if let Some(v) = values.get(variable) {
                return Some(v.clone());
            }
        }
        self.global.read().get(variable).cloned()
    }

    /// Resolve a set of variables for a host. Variables without any value
    /// are omitted from the result.
    pub fn get_values(&self, host: &Reference, variables: &[String]) -> IndexMap<String, String> {
        let mut out = IndexMap::new();
        for name in variables {
            if let Some(value) = self.get(host, name) {
                out.insert(name.clone(), value);
            }
        }
        out
    }

    /// All values visible to a host: globals overlaid by host-specific ones.
    pub fn all_for_host(&self, host: &Reference) -> IndexMap<String, String> {
        let mut out = self.global.read().clone();
        if let Some(values) = self.per_host.read().get(host) {
            for (k, v) in values {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}
