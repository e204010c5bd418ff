//! Typed clients for the sample's RPC surface.
//!
//! Both are thin wrappers over a shared [`RpcChannel`], suitable as
//! factories for [`fixtura_core::RpcClientHarness::with_client`].

use std::sync::Arc;

use fixtura_core::{RpcChannel, RpcError};

use crate::messages::{HelloReply, HelloRequest, IncrementReply, IncrementRequest};

#[derive(Clone)]
pub struct GreeterClient {
    channel: Arc<RpcChannel>,
}

impl GreeterClient {
    pub const SAY_HELLO: &'static str = "greeter.Greeter/SayHello";

    pub fn new(channel: Arc<RpcChannel>) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Arc<RpcChannel> {
        &self.channel
    }

    pub async fn say_hello(&self, name: &str) -> Result<HelloReply, RpcError> {
        let request = HelloRequest {
            name: name.to_string(),
        };
        self.channel.call(Self::SAY_HELLO, &request).await
    }
}

#[derive(Clone)]
pub struct CounterClient {
    channel: Arc<RpcChannel>,
}

impl CounterClient {
    pub const INCREMENT: &'static str = "counter.Counter/Increment";

    pub fn new(channel: Arc<RpcChannel>) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Arc<RpcChannel> {
        &self.channel
    }

    /// Increment the counter stored under `key`; returns the new value.
    pub async fn increment(&self, key: &str) -> Result<i64, RpcError> {
        let request = IncrementRequest {
            key: key.to_string(),
        };
        let reply: IncrementReply = self.channel.call(Self::INCREMENT, &request).await?;
        Ok(reply.value)
    }
}
