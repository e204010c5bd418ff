//! Kafka harnesses against a real broker.
//!
//! These tests need a Docker daemon: `cargo test -p fixtura-kafka -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use fixtura_core::ComponentBuilder;
use fixtura_kafka::{KafkaConsumerHarness, KafkaDefinition, KafkaProducerHarness, KafkaTopics};
use fixtura_test_utils::{ProbeEntryPoint, init_tracing};
use tokio_util::sync::CancellationToken;

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn produced_messages_reach_the_consumer() {
    init_tracing();
    let probe = ProbeEntryPoint::new();
    let kafka = Arc::new(
        KafkaDefinition::new()
            .with_topic("orders")
            .into_harness()
            .with_connection_name("Kafka"),
    );
    let producer = Arc::new(KafkaProducerHarness::new(Arc::clone(&kafka), "orders"));
    let consumer = Arc::new(KafkaConsumerHarness::new(Arc::clone(&kafka), "orders"));

    let mut component = ComponentBuilder::create(probe.clone())
        .add_harness(Arc::clone(&kafka))
        .add_harness(Arc::clone(&producer))
        .add_harness(Arc::clone(&consumer))
        .build();
    let cancel = CancellationToken::new();
    component.start(&cancel).await.unwrap();

    let bootstrap = kafka.connection_string().unwrap();
    assert_eq!(probe.boots()[0].connection_string("Kafka"), Some(bootstrap.as_str()));

    let (partition, offset) = producer.produce_acked(Some("order-1"), b"created").await.unwrap();
    assert_eq!(partition, 0);

    let record = consumer
        .consume(Duration::from_secs(30))
        .await
        .unwrap()
        .expect("message within 30s");
    assert_eq!(record.offset, offset);
    assert_eq!(record.key_str(), Some("order-1"));
    assert_eq!(record.payload_str(), Some("created"));

    // Rewinding replays the same message.
    consumer.seek_to_beginning().unwrap();
    let replayed = consumer.consume(Duration::from_secs(30)).await.unwrap().unwrap();
    assert_eq!(replayed.offset, offset);

    assert!(!kafka.create_topic("orders").await.unwrap());
    assert!(kafka.create_topic("refunds").await.unwrap());

    component.stop(&cancel).await.unwrap();
    assert!(kafka.endpoint().unwrap_err().is_not_started());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn cancellable_consume_returns_none_when_cancelled() {
    let kafka = Arc::new(KafkaDefinition::new().with_topic("idle").into_harness());
    let consumer = Arc::new(KafkaConsumerHarness::new(Arc::clone(&kafka), "idle"));
    let mut component = ComponentBuilder::create(ProbeEntryPoint::new())
        .add_harness(kafka)
        .add_harness(Arc::clone(&consumer))
        .build();
    let cancel = CancellationToken::new();
    component.start(&cancel).await.unwrap();

    let consume_cancel = CancellationToken::new();
    let trigger = consume_cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });
    assert!(consumer.consume_cancellable(&consume_cancel).await.unwrap().is_none());
    assert!(consumer.consume(Duration::from_millis(200)).await.unwrap().is_none());

    component.stop(&cancel).await.unwrap();
}
