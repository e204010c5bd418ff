//! HTTP access to the system under test.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};

use crate::error::ComponentError;
use crate::harness::{Binding, Dependency, Harness};

/// A reqwest client bound to the service's base URL.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Arc<str>,
}

impl HttpClient {
    /// Wrap `client` so that relative paths resolve against `base_url`.
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `path` (leading slash optional).
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.client.put(self.url(path))
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.client.delete(self.url(path))
    }

    /// The underlying reqwest client.
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Hands out HTTP clients for the service once the component has started.
#[derive(Debug, Default)]
pub struct HttpClientHarness {
    binding: Binding,
}

impl HttpClientHarness {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client for the running service.
    pub fn create_client(&self) -> Result<HttpClient, ComponentError> {
        self.binding.guard(self.name())?.http_client()
    }
}

#[async_trait]
impl Dependency for HttpClientHarness {
    fn name(&self) -> &str {
        "http-client"
    }

    fn binding(&self) -> &Binding {
        &self.binding
    }
}

impl Harness for HttpClientHarness {}
