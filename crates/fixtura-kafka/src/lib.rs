//! Kafka harnesses for fixtura.
//!
//! - [`KafkaHarness`]: a single-broker container; listed topics are created
//!   once it is reachable.
//! - [`KafkaProducerHarness`]: fire-and-forget and acknowledged produce to
//!   one topic, flushed on stop.
//! - [`KafkaConsumerHarness`]: timeout-bounded or cancellable consume from
//!   partition 0 of one topic, with seeking.
//!
//! Register the broker before the producer and consumer that read its
//! bootstrap address.

pub mod consumer;
pub mod container;
pub mod producer;

pub use consumer::{ConsumedRecord, KafkaConsumerHarness};
pub use container::{KafkaDefinition, KafkaHarness, KafkaTopics, create_topic};
pub use producer::KafkaProducerHarness;
pub use testcontainers_modules::kafka::KAFKA_PORT;
