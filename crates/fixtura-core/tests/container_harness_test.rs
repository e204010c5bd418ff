//! Container harness behaviour against a loopback stand-in process.

use std::sync::Arc;
use std::time::Duration;

use fixtura_core::{ComponentBuilder, ComponentError, ContainerHarness, Settings};
use fixtura_test_utils::{LoopbackDefinition, ProbeEntryPoint, init_tracing};
use tokio_util::sync::CancellationToken;

fn harness(definition: LoopbackDefinition) -> ContainerHarness<LoopbackDefinition> {
    ContainerHarness::new(definition).with_settings(Settings::default())
}

/// The `ExternalProcess` error wrapped inside a `DependencyStart`.
fn external_process(err: &ComponentError) -> (&str, &str) {
    let ComponentError::DependencyStart { source, .. } = err else {
        panic!("expected DependencyStart, got {err:?}");
    };
    match source.downcast_ref::<ComponentError>() {
        Some(ComponentError::ExternalProcess { kind, reason }) => (kind.as_str(), reason.as_str()),
        other => panic!("expected ExternalProcess, got {other:?}"),
    }
}

#[tokio::test]
async fn connection_string_is_only_published_after_start() {
    init_tracing();
    let probe = ProbeEntryPoint::new();
    let foo = Arc::new(harness(LoopbackDefinition::new("foo")).with_connection_name("Foo"));

    let mut component = ComponentBuilder::create(probe.clone())
        .add_harness(Arc::clone(&foo))
        .build();

    // Built, not started: nothing has been published and nothing is reachable.
    assert!(probe.boots().is_empty());
    assert!(foo.endpoint().unwrap_err().is_not_started());
    assert!(foo.connection_string().unwrap_err().is_not_started());

    let cancel = CancellationToken::new();
    component.start(&cancel).await.unwrap();

    let endpoint = foo.endpoint().unwrap();
    let boots = probe.boots();
    assert_eq!(boots.len(), 1);
    assert_eq!(
        boots[0].connection_string("Foo"),
        Some(endpoint.connection_string.as_str())
    );

    // The service reads it like any other configuration key.
    let body = component
        .http_client()
        .unwrap()
        .get("/config/ConnectionStrings:Foo")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, endpoint.connection_string);

    component.stop(&cancel).await.unwrap();
}

#[tokio::test]
async fn endpoint_is_stable_while_started() {
    let definition = LoopbackDefinition::new("cache");
    let stats = definition.stats();
    let cache = Arc::new(harness(definition));
    let mut component = ComponentBuilder::create(ProbeEntryPoint::new())
        .add_harness(Arc::clone(&cache))
        .build();
    let cancel = CancellationToken::new();
    component.start(&cancel).await.unwrap();

    let first = cache.endpoint().unwrap();
    let second = cache.endpoint().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.host, "127.0.0.1");
    assert_ne!(first.port, 0);
    assert_eq!(first.connection_string, format!("loopback://127.0.0.1:{}", first.port));
    assert_eq!(first.address(), format!("127.0.0.1:{}", first.port));
    assert!(cache.process_id().await.unwrap().starts_with("loopback-"));
    assert_eq!(stats.launched(), 1);

    component.stop(&cancel).await.unwrap();
    assert_eq!(stats.terminated(), 1);
    assert!(cache.endpoint().unwrap_err().is_not_started());
    assert!(cache.process_id().await.unwrap_err().is_not_started());
}

#[tokio::test]
async fn harness_without_connection_name_publishes_nothing() {
    let probe = ProbeEntryPoint::new();
    let quiet = Arc::new(harness(LoopbackDefinition::new("quiet")));
    assert_eq!(quiet.connection_name(), None);

    let mut component = ComponentBuilder::create(probe.clone())
        .add_harness(Arc::clone(&quiet))
        .build();
    let cancel = CancellationToken::new();
    component.start(&cancel).await.unwrap();

    let boots = probe.boots();
    assert!(boots[0].iter().all(|(key, _)| !key.starts_with("ConnectionStrings:")));
    // The endpoint itself is still available.
    assert!(quiet.endpoint().is_ok());

    component.stop(&cancel).await.unwrap();
}

#[tokio::test]
async fn process_that_never_becomes_ready_is_an_external_process_failure() {
    let definition = LoopbackDefinition::new("slow").with_launch_delay(Duration::from_secs(30));
    let stats = definition.stats();
    let slow = Arc::new(harness(definition).with_ready_timeout(Duration::from_millis(100)));
    let mut component = ComponentBuilder::create(ProbeEntryPoint::new())
        .add_harness(Arc::clone(&slow))
        .build();
    let cancel = CancellationToken::new();

    let err = component.start(&cancel).await.unwrap_err();
    let (kind, reason) = external_process(&err);
    assert_eq!(kind, "slow");
    assert!(reason.contains("not ready within 100ms"), "{reason}");
    assert_eq!(stats.launched(), 0);

    // Stop tolerates the half-started harness.
    component.stop(&cancel).await.unwrap();
    assert_eq!(stats.terminated(), 0);
}

#[tokio::test]
async fn launch_error_is_an_external_process_failure() {
    let broken = Arc::new(harness(LoopbackDefinition::new("broken").failing("image not found")));
    let mut component = ComponentBuilder::create(ProbeEntryPoint::new())
        .add_harness(broken)
        .build();
    let cancel = CancellationToken::new();

    let err = component.start(&cancel).await.unwrap_err();
    let (kind, reason) = external_process(&err);
    assert_eq!(kind, "broken");
    assert!(reason.contains("image not found"), "{reason}");
    component.stop(&cancel).await.unwrap();
}

#[tokio::test]
async fn cancellation_interrupts_a_pending_launch() {
    let definition = LoopbackDefinition::new("pending").with_launch_delay(Duration::from_secs(30));
    let pending = Arc::new(harness(definition));
    let mut component = ComponentBuilder::create(ProbeEntryPoint::new())
        .add_harness(pending)
        .build();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = component.start(&cancel).await.unwrap_err();
    let (_, reason) = external_process(&err);
    assert!(reason.contains("cancelled"), "{reason}");
    component.stop(&CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn later_harness_can_read_earlier_endpoint() {
    let first = Arc::new(harness(LoopbackDefinition::new("first")).with_connection_name("First"));
    let second = Arc::new(
        harness(LoopbackDefinition::new("second"))
            .with_name("second-store")
            .with_connection_name("Second"),
    );
    let probe = ProbeEntryPoint::new();
    let mut component = ComponentBuilder::create(probe.clone())
        .add_harness(Arc::clone(&first))
        .add_harness(Arc::clone(&second))
        .build();
    let cancel = CancellationToken::new();
    component.start(&cancel).await.unwrap();

    let config = &probe.boots()[0];
    assert_ne!(config.connection_string("First"), config.connection_string("Second"));
    assert_eq!(config.connection_string("Second"), Some(second.connection_string().unwrap().as_str()));

    component.stop(&cancel).await.unwrap();
    let err = second.endpoint().unwrap_err();
    assert!(err.to_string().contains("second-store"));
}
