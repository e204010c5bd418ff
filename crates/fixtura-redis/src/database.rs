//! A key-value connection scoped to the started window.

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fixtura_core::{Binding, ComponentContext, ComponentError, Dependency, Harness};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio_util::sync::CancellationToken;

use crate::container::RedisHarness;

/// One multiplexed connection to a peer Redis harness.
///
/// With a key prefix, every key passed to the typed operations is
/// namespaced as `<prefix><key>`. The raw [`connection`](Self::connection)
/// is not prefixed.
pub struct RedisDatabaseHarness {
    name: String,
    binding: Binding,
    redis: Arc<RedisHarness>,
    key_prefix: Option<String>,
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl RedisDatabaseHarness {
    /// A database harness for `redis`, which must be registered earlier.
    pub fn new(redis: Arc<RedisHarness>) -> Self {
        Self {
            name: "redis-database".to_string(),
            binding: Binding::new(),
            redis,
            key_prefix: None,
            connection: RwLock::new(None),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn key_prefix(&self) -> Option<&str> {
        self.key_prefix.as_deref()
    }

    /// The key as stored on the server.
    pub fn key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}{key}"),
            None => key.to_string(),
        }
    }

    /// A handle to the live connection. Guarded.
    pub fn connection(&self) -> Result<MultiplexedConnection, ComponentError> {
        self.binding.guard(&self.name)?;
        self.connection
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| ComponentError::not_started(self.name.as_str()))
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection()?;
        Ok(conn.get(self.key(key)).await?)
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection()?;
        let _: () = conn.set(self.key(key), value).await?;
        Ok(())
    }

    /// Increment the integer at `key` by `delta` and return the new value.
    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.connection()?;
        Ok(conn.incr(self.key(key), delta).await?)
    }

    /// Delete `key`; `true` if it existed.
    pub async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        let removed: i64 = conn.del(self.key(key)).await?;
        Ok(removed > 0)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        Ok(conn.exists(self.key(key)).await?)
    }
}

#[async_trait]
impl Dependency for RedisDatabaseHarness {
    fn name(&self) -> &str {
        &self.name
    }

    fn binding(&self) -> &Binding {
        &self.binding
    }

    async fn on_start(&self, _ctx: &ComponentContext, _cancel: &CancellationToken) -> Result<()> {
        let url = self
            .redis
            .connection_string()
            .context("redis harness must be registered and started before the database harness")?;
        let client = redis::Client::open(url.as_str())
            .with_context(|| format!("invalid redis url {url}"))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .with_context(|| format!("failed to connect to redis at {url}"))?;
        *self
            .connection
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(connection);
        tracing::info!(harness = %self.name, url = %url, prefix = ?self.key_prefix, "redis connection opened");
        Ok(())
    }

    async fn on_stop(&self, _ctx: &ComponentContext, _cancel: &CancellationToken) -> Result<()> {
        let closed = self
            .connection
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if closed.is_some() {
            tracing::info!(harness = %self.name, "redis connection closed");
        }
        Ok(())
    }
}

impl Harness for RedisDatabaseHarness {}
