//! The system under test: how it boots and how callers reach it.
//!
//! A service is opaque to the fixture. It receives a [`HostConfig`] once at
//! boot and is then reached only through its public endpoints.
//! [`RouterEntryPoint`] covers the common case of an axum application: it
//! serves the router on an ephemeral loopback port for the lifetime of the
//! component.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::HostConfig;

/// Boots the system under test.
#[async_trait]
pub trait EntryPoint: Send + Sync + 'static {
    /// Human-readable name used in logs.
    fn name(&self) -> &str {
        "service"
    }

    /// Boot the service with its final configuration.
    async fn boot(
        &self,
        config: HostConfig,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn RunningService>>;
}

/// A booted system under test.
#[async_trait]
pub trait RunningService: Send + Sync + 'static {
    /// Base URL of the HTTP surface, without a trailing slash.
    fn base_url(&self) -> &str;

    /// The configuration the service booted with.
    fn config(&self) -> &HostConfig;

    /// Stop serving and release the service's resources.
    async fn shutdown(&self) -> Result<()>;
}

/// Serves an axum [`Router`] built from the host configuration.
///
/// # Example
///
/// ```ignore
/// let entry = RouterEntryPoint::new("people-api", |config: HostConfig| async move {
///     let state = AppState::connect(&config).await?;
///     Ok(build_router(state))
/// });
/// ```
pub struct RouterEntryPoint<F> {
    name: String,
    factory: F,
}

impl<F, Fut> RouterEntryPoint<F>
where
    F: Fn(HostConfig) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Router>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, factory: F) -> Self {
        Self {
            name: name.into(),
            factory,
        }
    }
}

#[async_trait]
impl<F, Fut> EntryPoint for RouterEntryPoint<F>
where
    F: Fn(HostConfig) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Router>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn boot(
        &self,
        config: HostConfig,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn RunningService>> {
        let router = (self.factory)(config.clone())
            .await
            .with_context(|| format!("failed to build router for {}", self.name))?;
        let handle = ServeHandle::spawn(router, config, cancel.child_token()).await?;
        tracing::info!(service = %self.name, url = %handle.base_url, "service listening");
        Ok(Arc::new(handle))
    }
}

/// A router being served on a loopback listener.
#[derive(Debug)]
pub struct ServeHandle {
    addr: SocketAddr,
    base_url: String,
    config: HostConfig,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl ServeHandle {
    /// Bind `127.0.0.1:0` and serve `router` until `shutdown` fires.
    pub async fn spawn(
        router: Router,
        config: HostConfig,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .context("failed to bind service listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read service listener address")?;

        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            config,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl RunningService for ServeHandle {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn config(&self) -> &HostConfig {
        &self.config
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.await
                .context("service task panicked")?
                .context("service terminated with an error")?;
            tracing::info!(url = %self.base_url, "service shut down");
        }
        Ok(())
    }
}
