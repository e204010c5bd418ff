//! Harnesses that record when their hooks run.

use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;
use fixtura_core::{Binding, ComponentContext, ComponentError, ConfigPipeline, Dependency, Harness};
use tokio_util::sync::CancellationToken;

/// Shared, ordered record of lifecycle events such as `start:A` or `stop:B`.
#[derive(Debug, Clone, Default)]
pub struct OrderLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl OrderLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry.into());
    }

    /// Snapshot of every entry so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Names of the harnesses whose start hook ran, in order.
    pub fn starts(&self) -> Vec<String> {
        self.with_prefix("start:")
    }

    /// Names of the harnesses whose stop hook ran, in order.
    pub fn stops(&self) -> Vec<String> {
        self.with_prefix("stop:")
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix(prefix).map(str::to_string))
            .collect()
    }
}

/// A harness with no real resource. Logs `start:<name>` / `stop:<name>`.
pub struct RecordingHarness {
    name: String,
    log: OrderLog,
    binding: Binding,
    fail_start: bool,
    fail_stop: bool,
    setting: Option<(String, String)>,
    cancel_on_start: Option<CancellationToken>,
    peer: Option<Arc<RecordingHarness>>,
}

impl RecordingHarness {
    pub fn new(name: &str, log: &OrderLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            binding: Binding::new(),
            fail_start: false,
            fail_stop: false,
            setting: None,
            cancel_on_start: None,
            peer: None,
        }
    }

    /// Make the start hook fail (after logging).
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Make the stop hook fail (after logging).
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Contribute a fixed configuration entry.
    pub fn with_setting(mut self, key: &str, value: &str) -> Self {
        self.setting = Some((key.to_string(), value.to_string()));
        self
    }

    /// Cancel `token` from inside the start hook.
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_start = Some(token);
        self
    }

    /// Read `peer`'s resource during start and log the outcome as
    /// `peer:<value>` or `peer-error:<error>`.
    pub fn observing(mut self, peer: Arc<RecordingHarness>) -> Self {
        self.peer = Some(peer);
        self
    }

    /// The harness's "live resource". Guarded.
    pub fn resource(&self) -> Result<String, ComponentError> {
        self.binding.guard(&self.name)?;
        Ok(format!("{}-resource", self.name))
    }
}

#[async_trait]
impl Dependency for RecordingHarness {
    fn name(&self) -> &str {
        &self.name
    }

    fn binding(&self) -> &Binding {
        &self.binding
    }

    async fn on_start(&self, _ctx: &ComponentContext, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.log.record(format!("start:{}", self.name));
        if let Some(peer) = &self.peer {
            match peer.resource() {
                Ok(value) => self.log.record(format!("peer:{value}")),
                Err(e) => self.log.record(format!("peer-error:{e}")),
            }
        }
        if let Some(token) = &self.cancel_on_start {
            token.cancel();
        }
        if self.fail_start {
            bail!("{} refused to start", self.name);
        }
        Ok(())
    }

    async fn on_stop(&self, _ctx: &ComponentContext, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.log.record(format!("stop:{}", self.name));
        if self.fail_stop {
            bail!("{} refused to stop", self.name);
        }
        Ok(())
    }
}

impl Harness for RecordingHarness {
    fn configure(&self, pipeline: &mut ConfigPipeline) {
        if let Some((key, value)) = &self.setting {
            pipeline.set(key.clone(), value.clone());
        }
    }
}
