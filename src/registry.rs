//! Static station registry
//!
//! Maps station names to the source locators handed to the resolver.
//! Built once at startup and shared read-only afterwards.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::{RelayError, Result};

/// Names taken by the router's own endpoints
const RESERVED_NAMES: &[&str] = &["health", "version", "debug", "play"];

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"))
}

/// A named audio channel backed by a source locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Station {
    pub name: String,
    pub locator: String,
}

/// Immutable set of stations keyed by name
#[derive(Debug, Clone, Default)]
pub struct StationRegistry {
    stations: BTreeMap<String, Station>,
}

impl StationRegistry {
    /// Build the registry, rejecting names that cannot be routed
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let mut stations = BTreeMap::new();

        for (name, locator) in map {
            if !name_pattern().is_match(name) {
                return Err(RelayError::InvalidStation {
                    name: name.clone(),
                    reason: "only letters, digits, '_' and '-' are allowed".to_string(),
                });
            }
            if RESERVED_NAMES.contains(&name.as_str()) {
                return Err(RelayError::InvalidStation {
                    name: name.clone(),
                    reason: "name is reserved by the server".to_string(),
                });
            }
            if locator.trim().is_empty() {
                return Err(RelayError::InvalidStation {
                    name: name.clone(),
                    reason: "empty source locator".to_string(),
                });
            }

            stations.insert(
                name.clone(),
                Station {
                    name: name.clone(),
                    locator: locator.trim().to_string(),
                },
            );
        }

        Ok(Self { stations })
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&Station> {
        self.stations.get(name)
    }

    pub fn locator(&self, name: &str) -> Option<&str> {
        self.stations.get(name).map(|s| s.locator.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stations.contains_key(name)
    }

    /// Stations in name order
    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}
