//! HTTP and RPC client harnesses against the probe service.

use std::sync::Arc;

use fixtura_core::{
    ComponentBuilder, ComponentError, HttpClientHarness, RpcChannel, RpcClientHarness, RpcError,
};
use fixtura_test_utils::{ProbeEntryPoint, init_tracing};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

struct EchoClient {
    channel: Arc<RpcChannel>,
}

impl EchoClient {
    fn new(channel: Arc<RpcChannel>) -> Self {
        Self { channel }
    }

    async fn echo(&self, message: &str) -> Result<Value, RpcError> {
        self.channel
            .call("echo.Echo/Echo", &json!({ "message": message }))
            .await
    }
}

struct AdminClient {
    channel: Arc<RpcChannel>,
}

struct NeverRegistered;

#[tokio::test]
async fn http_client_reaches_the_service_only_while_started() {
    init_tracing();
    let http = Arc::new(HttpClientHarness::new());
    let mut component = ComponentBuilder::create(ProbeEntryPoint::new())
        .add_harness(Arc::clone(&http))
        .build();
    let cancel = CancellationToken::new();

    assert!(http.create_client().unwrap_err().is_not_started());
    component.start(&cancel).await.unwrap();

    let client = http.create_client().unwrap();
    let response = client.get("/health").send().await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "Healthy");
    assert_eq!(client.base_url(), component.service().unwrap().base_url());

    component.stop(&cancel).await.unwrap();
    assert!(http.create_client().unwrap_err().is_not_started());
}

#[tokio::test]
async fn rpc_clients_of_one_type_share_a_channel() {
    init_tracing();
    let rpc = Arc::new(
        RpcClientHarness::new()
            .with_client(EchoClient::new)
            .with_client(|channel| AdminClient { channel }),
    );
    let mut component = ComponentBuilder::create(ProbeEntryPoint::new())
        .add_harness(Arc::clone(&rpc))
        .build();
    let cancel = CancellationToken::new();
    component.start(&cancel).await.unwrap();
    assert_eq!(rpc.channel_count(), 0);

    let first: EchoClient = rpc.create_client().unwrap();
    let second: EchoClient = rpc.create_client().unwrap();
    assert!(Arc::ptr_eq(&first.channel, &second.channel));
    assert_eq!(rpc.channel_count(), 1);

    let admin: AdminClient = rpc.create_client().unwrap();
    assert_ne!(admin.channel.id(), first.channel.id());
    assert_eq!(rpc.channel_count(), 2);

    let reply = first.echo("hello").await.unwrap();
    assert_eq!(reply, json!({ "message": "hello" }));

    component.stop(&cancel).await.unwrap();
    assert_eq!(rpc.channel_count(), 0);
    assert!(first.channel.is_closed());
    assert!(matches!(first.echo("again").await, Err(RpcError::Closed(_))));
    let err = rpc.create_client::<EchoClient>().err().unwrap();
    assert!(err.is_not_started());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_lookups_create_one_channel() {
    let rpc = Arc::new(RpcClientHarness::new().with_client(EchoClient::new));
    let mut component = ComponentBuilder::create(ProbeEntryPoint::new())
        .add_harness(Arc::clone(&rpc))
        .build();
    let cancel = CancellationToken::new();
    component.start(&cancel).await.unwrap();

    let lookups = (0..32).map(|_| {
        let rpc = Arc::clone(&rpc);
        tokio::spawn(async move {
            let client: EchoClient = rpc.create_client().unwrap();
            client.channel.id()
        })
    });
    let ids: Vec<_> = futures::future::join_all(lookups)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(rpc.channel_count(), 1);
    component.stop(&cancel).await.unwrap();
}

#[tokio::test]
async fn unregistered_client_type_is_rejected() {
    let rpc = Arc::new(RpcClientHarness::new().with_client(EchoClient::new));
    let mut component = ComponentBuilder::create(ProbeEntryPoint::new())
        .add_harness(Arc::clone(&rpc))
        .build();
    let cancel = CancellationToken::new();
    component.start(&cancel).await.unwrap();

    let err = rpc.create_client::<NeverRegistered>().err().unwrap();
    assert!(matches!(err, ComponentError::UnregisteredClient { client } if client.ends_with("NeverRegistered")));
    assert_eq!(rpc.channel_count(), 0);

    component.stop(&cancel).await.unwrap();
}

#[tokio::test]
async fn rpc_status_errors_carry_the_method() {
    let rpc = Arc::new(RpcClientHarness::new().with_client(EchoClient::new));
    let mut component = ComponentBuilder::create(ProbeEntryPoint::new())
        .add_harness(Arc::clone(&rpc))
        .build();
    let cancel = CancellationToken::new();
    component.start(&cancel).await.unwrap();

    let client: EchoClient = rpc.create_client().unwrap();
    let err = client
        .channel
        .call::<_, Value>("echo.Echo/Missing", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Status { status: 404, ref method, .. } if method == "echo.Echo/Missing"));

    component.stop(&cancel).await.unwrap();
}
