//! On-disk registry document.
//!
//! ```json
//! {
//!   "environments": {
//!     "development": {
//!       "port_range": { "start": 5000, "end": 5999 },
//!       "assignments": { "feature-login": 5000 }
//!     }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{RegistryError, Result};

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    /// Number of ports in the range (0 for an inverted range).
    pub fn len(&self) -> usize {
        if self.start > self.end {
            0
        } else {
            usize::from(self.end - self.start) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// One environment: its range and the ports handed out from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub port_range: PortRange,
    #[serde(default)]
    pub assignments: BTreeMap<String, u16>,
}

impl EnvironmentState {
    pub fn new(port_range: PortRange) -> Self {
        Self {
            port_range,
            assignments: BTreeMap::new(),
        }
    }

    pub fn port_of(&self, client_id: &str) -> Option<u16> {
        self.assignments.get(client_id).copied()
    }

    /// Lowest port in the range not currently assigned.
    pub fn first_free_port(&self) -> Option<u16> {
        let used: BTreeSet<u16> = self.assignments.values().copied().collect();
        (self.port_range.start..=self.port_range.end).find(|port| !used.contains(port))
    }
}

/// The whole registry: environment name → environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryState {
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentState>,
}

impl RegistryState {
    /// Build an empty registry from `(name, range)` pairs.
    pub fn with_environments<I, S>(environments: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, PortRange)>,
        S: Into<String>,
    {
        let mut state = RegistryState::default();
        for (name, range) in environments {
            let name = name.into();
            if range.start > range.end {
                return Err(RegistryError::InvalidRange {
                    environment: name,
                    start: range.start,
                    end: range.end,
                });
            }
            state.environments.insert(name, EnvironmentState::new(range));
        }
        Ok(state)
    }

    pub fn environment(&self, name: &str) -> Result<&EnvironmentState> {
        self.environments
            .get(name)
            .ok_or_else(|| RegistryError::EnvironmentNotFound(name.to_string()))
    }

    pub fn environment_mut(&mut self, name: &str) -> Result<&mut EnvironmentState> {
        self.environments
            .get_mut(name)
            .ok_or_else(|| RegistryError::EnvironmentNotFound(name.to_string()))
    }

    /// Every `(environment, client, port)` triple, ordered by environment
    /// then client.
    pub fn assignments(&self) -> impl Iterator<Item = (&str, &str, u16)> {
        self.environments.iter().flat_map(|(env, state)| {
            state
                .assignments
                .iter()
                .map(move |(client, port)| (env.as_str(), client.as_str(), *port))
        })
    }

    /// Check the structural invariants of a loaded document: ranges are not
    /// inverted, assignments lie within their range and no port is booked
    /// twice inside one environment.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, env) in &self.environments {
            let range = env.port_range;
            if range.start > range.end {
                return Err(format!(
                    "{name}: start {} is greater than end {}",
                    range.start, range.end
                ));
            }
            let mut seen = BTreeSet::new();
            for (client, port) in &env.assignments {
                if !range.contains(*port) {
                    return Err(format!(
                        "{name}: {client} holds port {port} outside {}-{}",
                        range.start, range.end
                    ));
                }
                if !seen.insert(*port) {
                    return Err(format!("{name}: port {port} is assigned twice"));
                }
            }
        }
        Ok(())
    }
}
