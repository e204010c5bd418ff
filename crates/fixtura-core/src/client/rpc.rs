//! Remote-procedure access to the system under test.
//!
//! Calls are JSON documents posted to `{base}/rpc/{service}/{method}`.
//! Typed clients are thin wrappers around an [`RpcChannel`]; the
//! [`RpcClientHarness`] builds them from factories registered up front and
//! shares one channel per client type for the whole started window.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::component::ComponentContext;
use crate::error::ComponentError;
use crate::harness::{Binding, Dependency, Harness};

/// Errors from an RPC call.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc channel {0} is closed")]
    Closed(Uuid),

    #[error("rpc transport error")]
    Transport(#[from] reqwest::Error),

    #[error("rpc {method} failed with status {status}: {message}")]
    Status {
        method: String,
        status: u16,
        message: String,
    },
}

/// A connection to the service's RPC surface.
pub struct RpcChannel {
    id: Uuid,
    client: reqwest::Client,
    base_url: Arc<str>,
    closed: AtomicBool,
}

impl RpcChannel {
    /// Open a channel to the service at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            client: reqwest::Client::new(),
            base_url: Arc::from(base_url.trim_end_matches('/')),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Invoke `method` (e.g. `greeter.Greeter/SayHello`) with `request`.
    pub async fn call<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        if self.is_closed() {
            return Err(RpcError::Closed(self.id));
        }

        let url = format!("{}/rpc/{}", self.base_url, method.trim_start_matches('/'));
        tracing::debug!(channel = %self.id, method = method, "rpc call");
        let response = self.client.post(url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RpcError::Status {
                method: method.to_string(),
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    /// Refuse further calls. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(channel = %self.id, "rpc channel closed");
        }
    }
}

impl fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcChannel")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("closed", &self.is_closed())
            .finish()
    }
}

type ClientFactory = Box<dyn Fn(Arc<RpcChannel>) -> Box<dyn Any + Send> + Send + Sync>;

struct Registration {
    client: &'static str,
    factory: ClientFactory,
}

/// Creates typed RPC clients for the running service.
///
/// ```ignore
/// let rpc = Arc::new(RpcClientHarness::new().with_client(GreeterClient::new));
/// // after start:
/// let greeter: GreeterClient = rpc.create_client()?;
/// ```
#[derive(Default)]
pub struct RpcClientHarness {
    binding: Binding,
    factories: HashMap<TypeId, Registration>,
    channels: Mutex<HashMap<TypeId, Arc<RpcChannel>>>,
}

impl RpcClientHarness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory used to build clients of type `C`.
    pub fn with_client<C, F>(mut self, factory: F) -> Self
    where
        C: Send + 'static,
        F: Fn(Arc<RpcChannel>) -> C + Send + Sync + 'static,
    {
        self.factories.insert(
            TypeId::of::<C>(),
            Registration {
                client: type_name::<C>(),
                factory: Box::new(move |channel| -> Box<dyn Any + Send> {
                    Box::new(factory(channel))
                }),
            },
        );
        self
    }

    /// A client of type `C`, backed by the channel cached for `C`.
    ///
    /// The first call for a type opens the channel; later calls in the same
    /// started window reuse it.
    pub fn create_client<C: Send + 'static>(&self) -> Result<C, ComponentError> {
        let ctx = self.binding.guard(self.name())?;
        let key = TypeId::of::<C>();
        let registration =
            self.factories
                .get(&key)
                .ok_or(ComponentError::UnregisteredClient {
                    client: type_name::<C>(),
                })?;

        let channel = {
            let mut channels = self
                .channels
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match channels.get(&key) {
                Some(channel) => {
                    tracing::debug!(client = registration.client, channel = %channel.id(), "reusing rpc channel");
                    Arc::clone(channel)
                }
                None => {
                    let service = ctx.service()?;
                    let channel = Arc::new(RpcChannel::new(service.base_url()));
                    tracing::info!(client = registration.client, channel = %channel.id(), "opened rpc channel");
                    channels.insert(key, Arc::clone(&channel));
                    channel
                }
            }
        };

        (registration.factory)(channel)
            .downcast::<C>()
            .map(|client| *client)
            .map_err(|_| ComponentError::UnregisteredClient {
                client: registration.client,
            })
    }

    /// Number of channels currently cached.
    pub fn channel_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl Dependency for RpcClientHarness {
    fn name(&self) -> &str {
        "rpc-client"
    }

    fn binding(&self) -> &Binding {
        &self.binding
    }

    async fn on_stop(&self, _ctx: &ComponentContext, _cancel: &CancellationToken) -> anyhow::Result<()> {
        let drained: Vec<Arc<RpcChannel>> = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .map(|(_, channel)| channel)
            .collect();
        for channel in &drained {
            channel.close();
        }
        tracing::info!(channels = drained.len(), "rpc channels closed");
        Ok(())
    }
}

impl Harness for RpcClientHarness {}

impl fmt::Debug for RpcClientHarness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clients: Vec<&str> = self.factories.values().map(|r| r.client).collect();
        f.debug_struct("RpcClientHarness")
            .field("clients", &clients)
            .field("channels", &self.channel_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeter(Arc<RpcChannel>);

    #[test]
    fn create_client_before_start_fails() {
        let harness = RpcClientHarness::new().with_client(Greeter);
        let err = harness.create_client::<Greeter>().err().expect("not started");
        assert!(err.is_not_started());
        assert_eq!(harness.channel_count(), 0);
    }

    #[tokio::test]
    async fn closed_channel_refuses_calls() {
        let channel = RpcChannel::new("http://127.0.0.1:9/");
        assert_eq!(channel.base_url(), "http://127.0.0.1:9");
        channel.close();
        channel.close();
        let err = channel
            .call::<_, serde_json::Value>("greeter.Greeter/SayHello", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Closed(id) if id == channel.id()));
    }
}
