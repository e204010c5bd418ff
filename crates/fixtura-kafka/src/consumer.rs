//! A consumer reading partition 0 of one topic on a peer Kafka harness.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fixtura_core::{Binding, ComponentContext, ComponentError, Dependency, Harness};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::container::KafkaHarness;

const PARTITION: i32 = 0;

/// An owned copy of one consumed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    /// Milliseconds since the epoch, when the broker reported one.
    pub timestamp: Option<i64>,
}

impl ConsumedRecord {
    fn from_message<M: Message>(message: &M) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec),
            timestamp: message.timestamp().to_millis(),
        }
    }

    pub fn key_str(&self) -> Option<&str> {
        self.key.as_deref().and_then(|k| std::str::from_utf8(k).ok())
    }

    pub fn payload_str(&self) -> Option<&str> {
        self.payload.as_deref().and_then(|p| std::str::from_utf8(p).ok())
    }
}

/// Consumes one topic from the broker owned by a peer [`KafkaHarness`].
///
/// Each start joins under a fresh group id with auto-commit disabled and
/// partition 0 assigned at the end offset, so only messages produced after
/// start are seen unless the position is moved with one of the seek
/// operations.
pub struct KafkaConsumerHarness {
    name: String,
    binding: Binding,
    kafka: Arc<KafkaHarness>,
    topic: String,
    consumer: RwLock<Option<Arc<StreamConsumer>>>,
}

impl KafkaConsumerHarness {
    /// A consumer for `topic`; `kafka` must be registered earlier.
    pub fn new(kafka: Arc<KafkaHarness>, topic: impl Into<String>) -> Self {
        Self {
            name: "kafka-consumer".to_string(),
            binding: Binding::new(),
            kafka,
            topic: topic.into(),
            consumer: RwLock::new(None),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn consumer(&self) -> Result<Arc<StreamConsumer>, ComponentError> {
        self.binding.guard(&self.name)?;
        self.consumer
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| ComponentError::not_started(self.name.as_str()))
    }

    /// Wait up to `timeout` for the next message. `None` if nothing arrived.
    pub async fn consume(&self, timeout: Duration) -> Result<Option<ConsumedRecord>> {
        let consumer = self.consumer()?;
        match tokio::time::timeout(timeout, consumer.recv()).await {
            Ok(received) => {
                let message = received.with_context(|| format!("failed to consume from {}", self.topic))?;
                Ok(Some(ConsumedRecord::from_message(&message)))
            }
            Err(_) => Ok(None),
        }
    }

    /// Wait for the next message until `cancel` fires. `None` on cancellation.
    pub async fn consume_cancellable(&self, cancel: &CancellationToken) -> Result<Option<ConsumedRecord>> {
        let consumer = self.consumer()?;
        tokio::select! {
            () = cancel.cancelled() => Ok(None),
            received = consumer.recv() => {
                let message = received.with_context(|| format!("failed to consume from {}", self.topic))?;
                Ok(Some(ConsumedRecord::from_message(&message)))
            }
        }
    }

    pub fn seek_to_beginning(&self) -> Result<()> {
        self.assign(Offset::Beginning)
    }

    pub fn seek_to_end(&self) -> Result<()> {
        self.assign(Offset::End)
    }

    /// Continue from `offset` on partition 0.
    pub fn seek(&self, offset: i64) -> Result<()> {
        self.assign(Offset::Offset(offset))
    }

    fn assign(&self, offset: Offset) -> Result<()> {
        let consumer = self.consumer()?;
        assign_partition(&consumer, &self.topic, offset)
    }
}

fn assign_partition(consumer: &StreamConsumer, topic: &str, offset: Offset) -> Result<()> {
    let mut assignment = TopicPartitionList::new();
    assignment
        .add_partition_offset(topic, PARTITION, offset)
        .with_context(|| format!("invalid offset {offset:?} for {topic}"))?;
    consumer
        .assign(&assignment)
        .with_context(|| format!("failed to assign {topic}/{PARTITION}"))?;
    tracing::debug!(topic, partition = PARTITION, ?offset, "partition assigned");
    Ok(())
}

#[async_trait]
impl Dependency for KafkaConsumerHarness {
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
            .context("kafka harness must be registered and started before the consumer")?;
        let group = format!("fixtura-{}", Uuid::new_v4().simple());
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap)
            .set("group.id", &group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .set("allow.auto.create.topics", "false")
            .create()
            .context("failed to create kafka consumer")?;
        assign_partition(&consumer, &self.topic, Offset::End)?;
        *self
            .consumer
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(consumer));
        tracing::info!(harness = %self.name, topic = %self.topic, group = %group, "consumer opened");
        Ok(())
    }

    async fn on_stop(&self, _ctx: &ComponentContext, _cancel: &CancellationToken) -> Result<()> {
        let closed = self
            .consumer
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(consumer) = closed {
            consumer.unassign().context("failed to unassign consumer")?;
            tracing::info!(harness = %self.name, topic = %self.topic, "consumer closed");
        }
        Ok(())
    }
}

impl Harness for KafkaConsumerHarness {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::KafkaDefinition;

    fn harness() -> KafkaConsumerHarness {
        KafkaConsumerHarness::new(Arc::new(KafkaDefinition::new().into_harness()), "orders")
    }

    #[test]
    fn record_helpers_decode_utf8() {
        let record = ConsumedRecord {
            topic: "orders".to_string(),
            partition: 0,
            offset: 7,
            key: Some(b"order-1".to_vec()),
            payload: Some(vec![0xff, 0xfe]),
            timestamp: None,
        };
        assert_eq!(record.key_str(), Some("order-1"));
        assert_eq!(record.payload_str(), None);
    }

    #[tokio::test]
    async fn consume_is_guarded_before_start() {
        let consumer = harness();
        assert_eq!(consumer.topic(), "orders");
        let err = consumer.consume(Duration::from_millis(10)).await.unwrap_err();
        assert!(err.downcast_ref::<ComponentError>().unwrap().is_not_started());
    }

    #[test]
    fn seeking_is_guarded_before_start() {
        let consumer = harness();
        for result in [consumer.seek_to_beginning(), consumer.seek_to_end(), consumer.seek(3)] {
            let err = result.unwrap_err();
            assert!(err.downcast_ref::<ComponentError>().unwrap().is_not_started());
        }
    }
}
