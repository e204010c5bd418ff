//! A container definition backed by a loopback TCP listener.
//!
//! Behaves like a real external process from the harness's point of view:
//! it takes time to launch, exposes a mapped port, can fail to come up,
//! and must be terminated.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use fixtura_core::{ContainerDefinition, ContainerEndpoint, ProcessHandle, ProcessSpec, Settings};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Launch and terminate counters shared by every process of one definition.
#[derive(Debug, Clone, Default)]
pub struct LoopbackStats {
    launched: Arc<AtomicUsize>,
    terminated: Arc<AtomicUsize>,
}

impl LoopbackStats {
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct LoopbackDefinition {
    kind: String,
    launch_delay: Option<Duration>,
    launch_error: Option<String>,
    stats: LoopbackStats,
}

impl LoopbackDefinition {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            launch_delay: None,
            launch_error: None,
            stats: LoopbackStats::default(),
        }
    }

    /// Sleep this long before the listener is bound.
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = Some(delay);
        self
    }

    /// Fail every launch with `reason`.
    pub fn failing(mut self, reason: &str) -> Self {
        self.launch_error = Some(reason.to_string());
        self
    }

    pub fn stats(&self) -> LoopbackStats {
        self.stats.clone()
    }
}

#[async_trait]
impl ContainerDefinition for LoopbackDefinition {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn create_process(&self, _settings: &Settings) -> Box<dyn ProcessSpec> {
        Box::new(LoopbackSpec {
            delay: self.launch_delay,
            error: self.launch_error.clone(),
            stats: self.stats.clone(),
        })
    }

    fn container_port(&self) -> u16 {
        7000
    }

    fn connection_string(&self, host: &str, port: u16) -> String {
        format!("loopback://{host}:{port}")
    }

    async fn on_ready(&self, endpoint: &ContainerEndpoint, _cancel: &CancellationToken) -> anyhow::Result<()> {
        TcpStream::connect(endpoint.address())
            .await
            .with_context(|| format!("loopback {} is not accepting connections", endpoint.address()))?;
        Ok(())
    }
}

struct LoopbackSpec {
    delay: Option<Duration>,
    error: Option<String>,
    stats: LoopbackStats,
}

#[async_trait]
impl ProcessSpec for LoopbackSpec {
    async fn launch(self: Box<Self>) -> anyhow::Result<Box<dyn ProcessHandle>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.error {
            bail!("{reason}");
        }

        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });
        self.stats.launched.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(LoopbackProcess {
            id: format!("loopback-{}", Uuid::new_v4().simple()),
            port,
            accept,
            stats: self.stats.clone(),
        }))
    }
}

struct LoopbackProcess {
    id: String,
    port: u16,
    accept: JoinHandle<()>,
    stats: LoopbackStats,
}

#[async_trait]
impl ProcessHandle for LoopbackProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn host(&self) -> anyhow::Result<String> {
        Ok("127.0.0.1".to_string())
    }

    async fn mapped_port(&self, _internal: u16) -> anyhow::Result<u16> {
        Ok(self.port)
    }

    async fn terminate(self: Box<Self>) -> anyhow::Result<()> {
        self.accept.abort();
        self.stats.terminated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
