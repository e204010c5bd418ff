//! A minimal service that remembers how it was booted.

use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use fixtura_core::{EntryPoint, HostConfig, RunningService, ServeHandle};
use tokio_util::sync::CancellationToken;

use crate::recording::OrderLog;

/// Entry point for a probe service.
///
/// Routes:
/// - `GET /health` returns `Healthy`
/// - `GET /config/{key}` returns the boot-time value of `key`, or 404
/// - `POST /rpc/echo.Echo/Echo` echoes the JSON body
#[derive(Debug, Clone, Default)]
pub struct ProbeEntryPoint {
    boots: Arc<Mutex<Vec<HostConfig>>>,
    log: Option<OrderLog>,
    fail: bool,
}

impl ProbeEntryPoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log `service:boot` / `service:shutdown` into `log`.
    pub fn with_log(mut self, log: &OrderLog) -> Self {
        self.log = Some(log.clone());
        self
    }

    /// Make every boot fail.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Configurations passed to `boot`, oldest first.
    pub fn boots(&self) -> Vec<HostConfig> {
        self.boots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn router(config: HostConfig) -> Router {
        Router::new()
            .route("/health", get(|| async { "Healthy" }))
            .route("/config/{key}", get(read_config))
            .route(
                "/rpc/echo.Echo/Echo",
                post(|Json(body): Json<serde_json::Value>| async move { Json(body) }),
            )
            .with_state(Arc::new(config))
    }
}

async fn read_config(
    State(config): State<Arc<HostConfig>>,
    Path(key): Path<String>,
) -> Result<String, StatusCode> {
    config
        .get(&key)
        .map(str::to_string)
        .ok_or(StatusCode::NOT_FOUND)
}

#[async_trait]
impl EntryPoint for ProbeEntryPoint {
    fn name(&self) -> &str {
        "probe"
    }

    async fn boot(
        &self,
        config: HostConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Arc<dyn RunningService>> {
        self.boots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(config.clone());
        if let Some(log) = &self.log {
            log.record("service:boot");
        }
        if self.fail {
            bail!("probe service refused to boot");
        }

        let handle = ServeHandle::spawn(Self::router(config.clone()), config, cancel.child_token()).await?;
        Ok(Arc::new(ProbeService {
            handle,
            log: self.log.clone(),
        }))
    }
}

struct ProbeService {
    handle: ServeHandle,
    log: Option<OrderLog>,
}

#[async_trait]
impl RunningService for ProbeService {
    fn base_url(&self) -> &str {
        self.handle.base_url()
    }

    fn config(&self) -> &HostConfig {
        self.handle.config()
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        if let Some(log) = &self.log {
            log.record("service:shutdown");
        }
        self.handle.shutdown().await
    }
}
