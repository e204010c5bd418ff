//! Harnesses backed by an ephemeral external process.
//!
//! A [`ContainerDefinition`] describes one kind of process (image, port,
//! connection string format, optional post-readiness setup). A
//! [`ContainerHarness`] drives it: launch on start, expose the endpoint
//! while live, terminate on stop.
//!
//! The process runtime itself sits behind [`ProcessSpec`] and
//! [`ProcessHandle`]. Both are implemented for testcontainers requests and
//! containers, so any `testcontainers` image can back a harness.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ContainerRequest, Image};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::component::ComponentContext;
use crate::config::ConfigPipeline;
use crate::error::ComponentError;
use crate::harness::{Binding, Dependency, Harness};
use crate::settings::Settings;

/// A not-yet-running external process.
#[async_trait]
pub trait ProcessSpec: Send {
    /// Launch the process and wait until it reports ready.
    async fn launch(self: Box<Self>) -> Result<Box<dyn ProcessHandle>>;
}

/// A running external process.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Host on which the process's ports are reachable.
    async fn host(&self) -> Result<String>;

    /// Host-side port mapped to the process's `internal` port.
    async fn mapped_port(&self, internal: u16) -> Result<u16>;

    /// Stop the process and release it.
    async fn terminate(self: Box<Self>) -> Result<()>;
}

#[async_trait]
impl<I: Image + 'static> ProcessSpec for ContainerRequest<I> {
    async fn launch(self: Box<Self>) -> Result<Box<dyn ProcessHandle>> {
        let container = AsyncRunner::start(*self)
            .await
            .context("failed to start container")?;
        Ok(Box::new(container))
    }
}

#[async_trait]
impl<I: Image + 'static> ProcessHandle for ContainerAsync<I> {
    fn id(&self) -> &str {
        ContainerAsync::id(self)
    }

    async fn host(&self) -> Result<String> {
        let host = self
            .get_host()
            .await
            .context("failed to resolve container host")?;
        Ok(host.to_string())
    }

    async fn mapped_port(&self, internal: u16) -> Result<u16> {
        self.get_host_port_ipv4(internal)
            .await
            .with_context(|| format!("port {internal} is not exposed"))
    }

    async fn terminate(self: Box<Self>) -> Result<()> {
        let container = *self;
        container.stop().await.context("failed to stop container")?;
        container.rm().await.context("failed to remove container")?;
        Ok(())
    }
}

/// Reachable address of a live external process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEndpoint {
    pub host: String,
    pub port: u16,
    /// Kind-specific connection descriptor, e.g. a `postgresql://` URL.
    pub connection_string: String,
}

impl ContainerEndpoint {
    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ContainerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.connection_string)
    }
}

/// Describes one kind of external process.
#[async_trait]
pub trait ContainerDefinition: Send + Sync + 'static {
    /// Short kind name, used for logs, errors and image overrides (e.g. "postgres").
    fn kind(&self) -> &str;

    /// A fresh, not-yet-running process descriptor.
    fn create_process(&self, settings: &Settings) -> Box<dyn ProcessSpec>;

    /// Port inside the process that clients connect to.
    fn container_port(&self) -> u16;

    /// Connection descriptor for the process reachable at `host:port`.
    fn connection_string(&self, host: &str, port: u16) -> String;

    /// Setup run once the process is reachable (create topics, seed data).
    async fn on_ready(&self, _endpoint: &ContainerEndpoint, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }
}

/// A harness whose resource is an external process described by `D`.
///
/// If constructed with a connection name, the endpoint's connection string
/// is published to the service under `ConnectionStrings:<name>` right
/// before boot. Without a name nothing is published.
pub struct ContainerHarness<D> {
    definition: Arc<D>,
    name: String,
    connection_name: Option<String>,
    settings: Settings,
    ready_timeout: Duration,
    binding: Binding,
    endpoint: Arc<RwLock<Option<ContainerEndpoint>>>,
    process: Mutex<Option<Box<dyn ProcessHandle>>>,
}

impl<D: ContainerDefinition> ContainerHarness<D> {
    /// A harness for `definition` using settings resolved from the environment.
    pub fn new(definition: D) -> Self {
        Self::with_definition(definition, Settings::from_env())
    }

    fn with_definition(definition: D, settings: Settings) -> Self {
        Self {
            name: definition.kind().to_string(),
            definition: Arc::new(definition),
            connection_name: None,
            ready_timeout: settings.ready_timeout(),
            settings,
            binding: Binding::new(),
            endpoint: Arc::new(RwLock::new(None)),
            process: Mutex::new(None),
        }
    }

    /// Publish the connection string under `ConnectionStrings:<name>`.
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    /// Override the harness name used in logs and errors (defaults to the kind).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the settings; also resets the readiness budget from them.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.ready_timeout = settings.ready_timeout();
        self.settings = settings;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn definition(&self) -> &D {
        &self.definition
    }

    pub fn connection_name(&self) -> Option<&str> {
        self.connection_name.as_deref()
    }

    /// The live endpoint. Fails outside the started window.
    pub fn endpoint(&self) -> Result<ContainerEndpoint, ComponentError> {
        self.binding.guard(&self.name)?;
        self.endpoint
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| ComponentError::not_started(self.name.as_str()))
    }

    /// Connection string of the live endpoint.
    pub fn connection_string(&self) -> Result<String, ComponentError> {
        self.endpoint().map(|endpoint| endpoint.connection_string)
    }

    /// Runtime id of the live process.
    pub async fn process_id(&self) -> Result<String, ComponentError> {
        self.binding.guard(&self.name)?;
        self.process
            .lock()
            .await
            .as_ref()
            .map(|process| process.id().to_string())
            .ok_or_else(|| ComponentError::not_started(self.name.as_str()))
    }

    /// Run `work` bounded by the readiness budget and `cancel`, mapping any
    /// failure to [`ComponentError::ExternalProcess`].
    async fn until_ready<T>(
        &self,
        cancel: &CancellationToken,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let kind = self.definition.kind();
        let failure = |reason: String| -> anyhow::Error {
            ComponentError::ExternalProcess {
                kind: kind.to_string(),
                reason,
            }
            .into()
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                Err(failure("cancelled before the process became ready".to_string()))
            }
            outcome = tokio::time::timeout(self.ready_timeout, work) => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(failure(format!("{e:#}"))),
                Err(_) => Err(failure(format!(
                    "not ready within {}ms",
                    self.ready_timeout.as_millis()
                ))),
            },
        }
    }
}

#[async_trait]
impl<D: ContainerDefinition> Dependency for ContainerHarness<D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn binding(&self) -> &Binding {
        &self.binding
    }

    async fn on_start(&self, _ctx: &ComponentContext, cancel: &CancellationToken) -> Result<()> {
        let kind = self.definition.kind();
        tracing::info!(harness = %self.name, kind = kind, "launching external process");

        let spec = self.definition.create_process(&self.settings);
        let process = self.until_ready(cancel, spec.launch()).await?;

        // Keep the handle before resolving the endpoint so stop can release it
        // even if resolution fails.
        let mut slot = self.process.lock().await;
        let process = slot.insert(process);
        let id = process.id().to_string();
        let (host, port) = self
            .until_ready(cancel, async {
                let host = process.host().await?;
                let port = process.mapped_port(self.definition.container_port()).await?;
                Ok((host, port))
            })
            .await?;
        drop(slot);

        let endpoint = ContainerEndpoint {
            connection_string: self.definition.connection_string(&host, port),
            host,
            port,
        };
        self.until_ready(cancel, self.definition.on_ready(&endpoint, cancel))
            .await?;

        tracing::info!(
            harness = %self.name,
            kind = kind,
            process = %id,
            endpoint = %endpoint.address(),
            "external process ready"
        );
        *self
            .endpoint
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(endpoint);
        Ok(())
    }

    async fn on_stop(&self, _ctx: &ComponentContext, cancel: &CancellationToken) -> Result<()> {
        self.endpoint
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let Some(process) = self.process.lock().await.take() else {
            tracing::debug!(harness = %self.name, "no external process to terminate");
            return Ok(());
        };
        let id = process.id().to_string();
        let budget = self.settings.stop_timeout();

        tokio::select! {
            _ = cancel.cancelled() => {
                bail!("stop of {} process {id} was cancelled", self.definition.kind())
            }
            outcome = tokio::time::timeout(budget, process.terminate()) => match outcome {
                Ok(result) => result.with_context(|| {
                    format!("failed to terminate {} process {id}", self.definition.kind())
                })?,
                Err(_) => bail!(
                    "{} process {id} did not terminate within {}s",
                    self.definition.kind(),
                    budget.as_secs()
                ),
            },
        }

        tracing::info!(harness = %self.name, process = %id, "external process terminated");
        Ok(())
    }
}

impl<D: ContainerDefinition> Harness for ContainerHarness<D> {
    fn configure(&self, pipeline: &mut ConfigPipeline) {
        let Some(name) = self.connection_name.clone() else {
            tracing::debug!(
                harness = %self.name,
                "no connection name configured, endpoint will not be published"
            );
            return;
        };

        let slot = Arc::clone(&self.endpoint);
        let harness = self.name.clone();
        pipeline.add_step(move |config| {
            let endpoint = slot.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            let Some(endpoint) = endpoint.as_ref() else {
                bail!("{harness} has no live endpoint to publish as {name}");
            };
            config.set_connection_string(&name, endpoint.connection_string.clone());
            Ok(())
        });
    }
}

impl<D> fmt::Debug for ContainerHarness<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerHarness")
            .field("name", &self.name)
            .field("connection_name", &self.connection_name)
            .field("ready_timeout", &self.ready_timeout)
            .field("live", &self.binding.is_live())
            .finish()
    }
}
