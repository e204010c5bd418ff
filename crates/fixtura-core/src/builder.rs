//! Fluent construction of a [`Component`].

use std::fmt;
use std::sync::Arc;

use crate::component::Component;
use crate::config::{ConfigPipeline, HostConfig};
use crate::harness::{Dependency, Harness};
use crate::service::EntryPoint;

/// Accumulates dependencies and configuration steps for one fixture.
///
/// Building is pure: no harness hook other than
/// [`Harness::configure`] runs, and no external process is launched until
/// [`Component::start`].
pub struct ComponentBuilder<E> {
    entry_point: Arc<E>,
    dependencies: Vec<Arc<dyn Dependency>>,
    pipeline: ConfigPipeline,
}

impl<E: EntryPoint> ComponentBuilder<E> {
    /// Start a builder for the service booted by `entry_point`.
    pub fn create(entry_point: E) -> Self {
        Self {
            entry_point: Arc::new(entry_point),
            dependencies: Vec::new(),
            pipeline: ConfigPipeline::new(),
        }
    }

    /// Register a harness. Its configuration hook runs now; its start hook
    /// runs in registration order when the component starts.
    pub fn add_harness<H: Harness + 'static>(mut self, harness: Arc<H>) -> Self {
        tracing::debug!(harness = harness.name(), "registering harness");
        harness.configure(&mut self.pipeline);
        self.dependencies.push(harness);
        self
    }

    /// Register a dependency that contributes no configuration.
    pub fn add_dependency(mut self, dependency: Arc<dyn Dependency>) -> Self {
        tracing::debug!(dependency = dependency.name(), "registering dependency");
        self.dependencies.push(dependency);
        self
    }

    /// Add a deferred configuration step of the caller's own.
    pub fn configure<F>(mut self, step: F) -> Self
    where
        F: Fn(&mut HostConfig) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.pipeline.add_step(step);
        self
    }

    /// Add a fixed configuration entry.
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pipeline.set(key, value);
        self
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies.len()
    }

    /// Produce the component. Nothing is started.
    pub fn build(self) -> Component<E> {
        Component::new(self.entry_point, self.dependencies, self.pipeline)
    }
}

impl<E> Clone for ComponentBuilder<E> {
    fn clone(&self) -> Self {
        Self {
            entry_point: Arc::clone(&self.entry_point),
            dependencies: self.dependencies.clone(),
            pipeline: self.pipeline.clone(),
        }
    }
}

impl<E> fmt::Debug for ComponentBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.dependencies.iter().map(|d| d.name()).collect();
        f.debug_struct("ComponentBuilder")
            .field("dependencies", &names)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}
