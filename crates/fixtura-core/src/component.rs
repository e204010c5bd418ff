//! The fixture aggregate: owns the dependency sequence and the service handle.
//!
//! ```text
//!  NotStarted --start()--> Started --stop()--> Stopped
//!      |                                          ^
//!      +--start() fails--> Failed --stop()--------+
//! ```
//!
//! `start` runs every dependency's start hook strictly in registration order
//! and stops at the first failure; nothing is rolled back automatically.
//! Only after all dependencies are up is the host configuration assembled
//! and the service booted. `stop` unwinds in exact reverse order, attempts
//! every stop even when some fail, and shuts the service down last.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::http::HttpClient;
use crate::config::{ConfigPipeline, HostConfig};
use crate::error::{ComponentError, Result, StopFailure};
use crate::harness::Dependency;
use crate::service::{EntryPoint, RunningService};

struct Shared {
    id: Uuid,
    name: String,
    started: AtomicBool,
    service: RwLock<Option<Arc<dyn RunningService>>>,
    http: reqwest::Client,
}

/// A cheap, cloneable view of a component handed to its harnesses.
///
/// Harnesses keep the context they were bound with and use it to reach the
/// service once the component has started.
#[derive(Clone)]
pub struct ComponentContext {
    shared: Arc<Shared>,
}

impl ComponentContext {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                name: name.to_string(),
                started: AtomicBool::new(false),
                service: RwLock::new(None),
                http: reqwest::Client::new(),
            }),
        }
    }

    /// Unique id of the component, distinct for every built fixture.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Name of the service entry point.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    /// The running service. Fails outside the started window.
    pub fn service(&self) -> Result<Arc<dyn RunningService>> {
        if !self.is_started() {
            return Err(ComponentError::not_started(self.name()));
        }
        self.shared
            .service
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| ComponentError::not_started(self.name()))
    }

    /// An HTTP client bound to the running service.
    pub fn http_client(&self) -> Result<HttpClient> {
        let service = self.service()?;
        Ok(HttpClient::new(self.shared.http.clone(), service.base_url()))
    }

    fn publish(&self, service: Arc<dyn RunningService>) {
        *self
            .shared
            .service
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(service);
        self.shared.started.store(true, Ordering::Release);
    }

    fn retract(&self) -> Option<Arc<dyn RunningService>> {
        self.shared.started.store(false, Ordering::Release);
        self.shared
            .service
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentContext")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("started", &self.is_started())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    Started,
    /// Start aborted; the first `attempted` dependencies had their start hook invoked.
    Failed {
        attempted: usize,
    },
    Stopped,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::NotStarted => "not started",
            Phase::Started => "started",
            Phase::Failed { .. } => "failed to start",
            Phase::Stopped => "stopped",
        }
    }
}

/// A built fixture: a service entry point plus its ordered dependencies.
///
/// Created by [`crate::ComponentBuilder::build`]. Single use: start once,
/// stop once.
pub struct Component<E: EntryPoint> {
    entry_point: Arc<E>,
    dependencies: Vec<Arc<dyn Dependency>>,
    pipeline: ConfigPipeline,
    context: ComponentContext,
    phase: Phase,
}

impl<E: EntryPoint> Component<E> {
    pub(crate) fn new(
        entry_point: Arc<E>,
        dependencies: Vec<Arc<dyn Dependency>>,
        pipeline: ConfigPipeline,
    ) -> Self {
        let context = ComponentContext::new(entry_point.name());
        Self {
            entry_point,
            dependencies,
            pipeline,
            context,
            phase: Phase::NotStarted,
        }
    }

    pub fn id(&self) -> Uuid {
        self.context.id()
    }

    pub fn context(&self) -> &ComponentContext {
        &self.context
    }

    /// `true` only between a fully successful start and the end of stop.
    pub fn is_started(&self) -> bool {
        self.context.is_started()
    }

    /// Dependency names in registration order.
    pub fn dependency_names(&self) -> Vec<&str> {
        self.dependencies.iter().map(|d| d.name()).collect()
    }

    /// The running service. Fails outside the started window.
    pub fn service(&self) -> Result<Arc<dyn RunningService>> {
        self.context.service()
    }

    /// An HTTP client bound to the running service.
    pub fn http_client(&self) -> Result<HttpClient> {
        self.context.http_client()
    }

    /// Start every dependency in order, then boot the service.
    ///
    /// On failure the dependencies that already started are left running;
    /// call [`Component::stop`] to unwind them.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.phase != Phase::NotStarted {
            return Err(ComponentError::InvalidState {
                operation: "start",
                state: self.phase.label(),
            });
        }

        tracing::info!(
            component = %self.id(),
            service = %self.context.name(),
            dependencies = self.dependencies.len(),
            "starting component"
        );

        let mut attempted = 0;
        let result = self.run_start(cancel, &mut attempted).await;
        match &result {
            Ok(()) => {
                self.phase = Phase::Started;
                tracing::info!(component = %self.id(), "component started");
            }
            Err(e) => {
                self.phase = Phase::Failed { attempted };
                tracing::warn!(
                    component = %self.id(),
                    attempted = attempted,
                    error = %e,
                    "component start aborted; started dependencies are left running"
                );
            }
        }
        result
    }

    async fn run_start(&self, cancel: &CancellationToken, attempted: &mut usize) -> Result<()> {
        for (index, dependency) in self.dependencies.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ComponentError::Cancelled {
                    completed: *attempted,
                });
            }

            let binding = dependency.binding();
            binding.bind(&self.context, dependency.name())?;
            *attempted = index + 1;

            tracing::info!(
                component = %self.id(),
                index = index,
                harness = dependency.name(),
                "starting dependency"
            );
            dependency
                .on_start(&self.context, cancel)
                .await
                .map_err(|source| ComponentError::DependencyStart {
                    index,
                    harness: dependency.name().to_string(),
                    source,
                })?;
            binding.mark_live();
        }

        if cancel.is_cancelled() {
            return Err(ComponentError::Cancelled {
                completed: *attempted,
            });
        }

        let config = self
            .pipeline
            .apply(HostConfig::new())
            .map_err(|source| ComponentError::Configuration { source })?;
        tracing::debug!(
            component = %self.id(),
            entries = config.len(),
            "host configuration assembled"
        );

        let service = self
            .entry_point
            .boot(config, cancel)
            .await
            .map_err(|source| ComponentError::ServiceBoot { source })?;
        self.context.publish(service);
        Ok(())
    }

    /// Stop dependencies in reverse registration order, then shut the service down.
    ///
    /// Every dependency whose start hook ran is asked to stop, including one
    /// whose start failed. Failures are collected into
    /// [`ComponentError::Stop`] after the unwind completes. Stopping an
    /// already stopped component is a no-op.
    pub async fn stop(&mut self, cancel: &CancellationToken) -> Result<()> {
        let attempted = match self.phase {
            Phase::NotStarted => 0,
            Phase::Started => self.dependencies.len(),
            Phase::Failed { attempted } => attempted,
            Phase::Stopped => {
                tracing::debug!(component = %self.id(), "component already stopped");
                return Ok(());
            }
        };

        tracing::info!(
            component = %self.id(),
            dependencies = attempted,
            "stopping component"
        );

        let mut failures = Vec::new();
        for index in (0..attempted).rev() {
            let dependency = &self.dependencies[index];
            dependency.binding().mark_stopped();

            tracing::info!(
                component = %self.id(),
                index = index,
                harness = dependency.name(),
                "stopping dependency"
            );
            if let Err(error) = dependency.on_stop(&self.context, cancel).await {
                tracing::warn!(
                    component = %self.id(),
                    index = index,
                    harness = dependency.name(),
                    error = %format!("{error:#}"),
                    "dependency failed to stop"
                );
                failures.push(StopFailure {
                    index: Some(index),
                    harness: dependency.name().to_string(),
                    error,
                });
            }
        }

        if let Some(service) = self.context.retract() {
            if let Err(error) = service.shutdown().await {
                tracing::warn!(
                    component = %self.id(),
                    error = %format!("{error:#}"),
                    "service failed to shut down"
                );
                failures.push(StopFailure {
                    index: None,
                    harness: self.entry_point.name().to_string(),
                    error,
                });
            }
        }

        self.phase = Phase::Stopped;

        if failures.is_empty() {
            tracing::info!(component = %self.id(), "component stopped");
            Ok(())
        } else {
            Err(ComponentError::Stop { failures })
        }
    }
}

impl<E: EntryPoint> Drop for Component<E> {
    fn drop(&mut self) {
        let leaked = match self.phase {
            Phase::Started => self.dependencies.len(),
            Phase::Failed { attempted } => attempted,
            Phase::NotStarted | Phase::Stopped => 0,
        };
        if leaked > 0 {
            tracing::warn!(
                component = %self.id(),
                dependencies = leaked,
                "component dropped without stop(); its dependencies were not stopped"
            );
        }
    }
}

impl<E: EntryPoint> fmt::Debug for Component<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id())
            .field("service", &self.context.name())
            .field("dependencies", &self.dependency_names())
            .field("phase", &self.phase)
            .finish()
    }
}
