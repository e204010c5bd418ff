//! The Kafka broker container definition and topic provisioning.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use fixtura_core::{ContainerDefinition, ContainerEndpoint, ContainerHarness, ProcessSpec, Settings};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::types::RDKafkaErrorCode;
use testcontainers::{ContainerRequest, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use tokio_util::sync::CancellationToken;

const ADMIN_TIMEOUT: Duration = Duration::from_secs(30);

/// A single-broker Kafka container. The connection string is the
/// bootstrap address `host:port`.
///
/// Topics listed with [`KafkaDefinition::with_topic`] are created once the
/// broker is reachable. A topic that already exists is accepted; any other
/// failure aborts the start.
#[derive(Debug, Clone, Default)]
pub struct KafkaDefinition {
    topics: Vec<String>,
}

/// A harness owning one Kafka broker container.
pub type KafkaHarness = ContainerHarness<KafkaDefinition>;

impl KafkaDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn into_harness(self) -> KafkaHarness {
        ContainerHarness::new(self)
    }
}

#[async_trait]
impl ContainerDefinition for KafkaDefinition {
    fn kind(&self) -> &str {
        "kafka"
    }

    fn create_process(&self, settings: &Settings) -> Box<dyn ProcessSpec> {
        let request = match settings.image_tag(self.kind()) {
            Some(tag) => Kafka::default().with_tag(tag),
            None => ContainerRequest::from(Kafka::default()),
        };
        Box::new(request)
    }

    fn container_port(&self) -> u16 {
        KAFKA_PORT.as_u16()
    }

    fn connection_string(&self, host: &str, port: u16) -> String {
        format!("{host}:{port}")
    }

    async fn on_ready(&self, endpoint: &ContainerEndpoint, _cancel: &CancellationToken) -> Result<()> {
        for topic in &self.topics {
            create_topic(&endpoint.connection_string, topic).await?;
        }
        Ok(())
    }
}

/// Create a single-partition topic on the broker at `bootstrap`.
///
/// Returns `false` if the topic already existed.
pub async fn create_topic(bootstrap: &str, topic: &str) -> Result<bool> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", bootstrap)
        .create()
        .context("failed to create kafka admin client")?;
    let options = AdminOptions::new()
        .operation_timeout(Some(ADMIN_TIMEOUT))
        .request_timeout(Some(ADMIN_TIMEOUT));

    let results = admin
        .create_topics(&[NewTopic::new(topic, 1, TopicReplication::Fixed(1))], &options)
        .await
        .with_context(|| format!("failed to create topic {topic}"))?;

    let mut created = false;
    for result in results {
        match result {
            Ok(name) => {
                tracing::info!(topic = %name, "topic created");
                created = true;
            }
            Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                tracing::debug!(topic = %name, "topic already exists");
            }
            Err((name, code)) => bail!("failed to create topic {name}: {code}"),
        }
    }
    Ok(created)
}

/// Topic management on a live Kafka harness.
#[async_trait]
pub trait KafkaTopics {
    /// Create `topic` on the running broker. Returns `false` if it already existed.
    async fn create_topic(&self, topic: &str) -> Result<bool>;
}

#[async_trait]
impl KafkaTopics for KafkaHarness {
    async fn create_topic(&self, topic: &str) -> Result<bool> {
        let bootstrap = self.connection_string()?;
        create_topic(&bootstrap, topic).await
    }
}
