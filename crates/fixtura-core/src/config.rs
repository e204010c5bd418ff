//! Named-key host configuration handed to the system under test at boot.
//!
//! Harnesses never write into a live service. Instead each harness adds
//! deferred steps to a [`ConfigPipeline`] while the fixture is being built;
//! the component evaluates the pipeline, in registration order, right before
//! the service boots. By then every dependency has started, so steps can read
//! endpoints that only exist once an external process is running.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Key prefix under which connection strings are stored.
pub const CONNECTION_STRINGS_SECTION: &str = "ConnectionStrings";

/// Flat, ordered key/value configuration read once by the service at boot.
///
/// Keys are hierarchical by convention, using `:` as the separator
/// (e.g. `ConnectionStrings:PeopleDb`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    entries: BTreeMap<String, String>,
}

impl HostConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from key/value pairs. Later pairs win.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = Self::new();
        for (key, value) in pairs {
            config.set(key, value);
        }
        config
    }

    /// Set `key` to `value`, returning the previous value if any.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// The full key used for the connection string called `name`.
    pub fn connection_string_key(name: &str) -> String {
        format!("{CONNECTION_STRINGS_SECTION}:{name}")
    }

    /// Look up the connection string registered under the logical `name`.
    pub fn connection_string(&self, name: &str) -> Option<&str> {
        self.get(&Self::connection_string_key(name))
    }

    /// Register a connection string under the logical `name`.
    pub fn set_connection_string(
        &mut self,
        name: &str,
        value: impl Into<String>,
    ) -> Option<String> {
        self.set(Self::connection_string_key(name), value)
    }

    /// Iterate over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type ConfigStep = Arc<dyn Fn(&mut HostConfig) -> Result<()> + Send + Sync>;

/// An ordered list of deferred configuration steps.
///
/// Cloning is cheap: steps are shared, so a cloned pipeline can be extended
/// without affecting the original.
#[derive(Clone, Default)]
pub struct ConfigPipeline {
    steps: Vec<ConfigStep>,
}

impl ConfigPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Steps run in the order they were added and each one
    /// sees the entries written by the steps before it.
    pub fn add_step<F>(&mut self, step: F)
    where
        F: Fn(&mut HostConfig) -> Result<()> + Send + Sync + 'static,
    {
        self.steps.push(Arc::new(step));
    }

    /// Append a step that writes a fixed entry.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        self.add_step(move |config| {
            config.set(key.clone(), value.clone());
            Ok(())
        });
    }

    /// Append every step of `other` after the steps of `self`.
    pub fn extend(&mut self, other: &ConfigPipeline) {
        self.steps.extend(other.steps.iter().cloned());
    }

    /// Run every step against `base` and return the resulting configuration.
    pub fn apply(&self, mut base: HostConfig) -> Result<HostConfig> {
        for step in &self.steps {
            step(&mut base)?;
        }
        Ok(base)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Debug for ConfigPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigPipeline")
            .field("steps", &self.steps.len())
            .finish()
    }
}
