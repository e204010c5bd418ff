//! A producer bound to one topic on a peer Kafka harness.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use fixtura_core::{Binding, ComponentContext, ComponentError, Dependency, Harness};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio_util::sync::CancellationToken;

use crate::container::KafkaHarness;

const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes to a fixed topic on the broker owned by a peer [`KafkaHarness`].
pub struct KafkaProducerHarness {
    name: String,
    binding: Binding,
    kafka: Arc<KafkaHarness>,
    topic: String,
    delivery_timeout: Duration,
    producer: RwLock<Option<FutureProducer>>,
}

impl KafkaProducerHarness {
    /// A producer for `topic`; `kafka` must be registered earlier.
    pub fn new(kafka: Arc<KafkaHarness>, topic: impl Into<String>) -> Self {
        Self {
            name: "kafka-producer".to_string(),
            binding: Binding::new(),
            kafka,
            topic: topic.into(),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            producer: RwLock::new(None),
        }
    }

    /// How long `produce_acked` waits for a delivery report.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn producer(&self) -> Result<FutureProducer, ComponentError> {
        self.binding.guard(&self.name)?;
        self.producer
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| ComponentError::not_started(self.name.as_str()))
    }

    /// Enqueue a message without waiting for the broker.
    pub fn produce(&self, key: Option<&str>, payload: &[u8]) -> Result<()> {
        let producer = self.producer()?;
        let record = FutureRecord::<str, [u8]>::to(&self.topic).payload(payload);
        let record = match key {
            Some(key) => record.key(key),
            None => record,
        };
        producer
            .send_result(record)
            .map_err(|(err, _)| anyhow!(err))
            .with_context(|| format!("failed to enqueue message for {}", self.topic))?;
        Ok(())
    }

    /// Send a message and wait for its delivery report.
    ///
    /// Returns the `(partition, offset)` the broker assigned.
    pub async fn produce_acked(&self, key: Option<&str>, payload: &[u8]) -> Result<(i32, i64)> {
        let producer = self.producer()?;
        let record = FutureRecord::<str, [u8]>::to(&self.topic).payload(payload);
        let record = match key {
            Some(key) => record.key(key),
            None => record,
        };
        let (partition, offset) = producer
            .send(record, Timeout::After(self.delivery_timeout))
            .await
            .map_err(|(err, _)| anyhow!(err))
            .with_context(|| format!("delivery to {} failed", self.topic))?;
        tracing::debug!(topic = %self.topic, partition, offset, "message delivered");
        Ok((partition, offset))
    }
}

#[async_trait]
impl Dependency for KafkaProducerHarness {
    fn name(&self) -> &str {
        &self.name
    }

    fn binding(&self) -> &Binding {
        &self.binding
    }

    async fn on_start(&self, _ctx: &ComponentContext, _cancel: &CancellationToken) -> Result<()> {
        let bootstrap = self
            .kafka
            .connection_string()
            .context("kafka harness must be registered and started before the producer")?;
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap)
            .set("message.timeout.ms", self.delivery_timeout.as_millis().to_string())
            .create()
            .context("failed to create kafka producer")?;
        *self
            .producer
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(producer);
        tracing::info!(harness = %self.name, topic = %self.topic, bootstrap = %bootstrap, "producer opened");
        Ok(())
    }

    async fn on_stop(&self, _ctx: &ComponentContext, _cancel: &CancellationToken) -> Result<()> {
        let producer = self
            .producer
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(producer) = producer else {
            return Ok(());
        };
        // flush blocks the calling thread until the queue drains
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT)))
            .await
            .context("flush task panicked")?
            .with_context(|| format!("failed to flush producer for {}", self.topic))?;
        tracing::info!(harness = %self.name, topic = %self.topic, "producer flushed and closed");
        Ok(())
    }
}

impl Harness for KafkaProducerHarness {}
