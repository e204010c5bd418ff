//! Lifecycle orchestration for integration-test fixtures.
//!
//! A fixture is a system under test plus an ordered list of infrastructure
//! harnesses (databases, brokers, caches, clients):
//!
//! ```text
//! ComponentBuilder::create(entry)
//!     .add_harness(postgres)    -- configure() folds into the ConfigPipeline
//!     .add_harness(redis)
//!     .add_harness(http)
//!     .build()                  -- nothing runs yet
//!         |
//!         v
//! Component::start  -> postgres.on_start, redis.on_start, http.on_start
//!                   -> pipeline.apply() -> entry.boot(config)
//! Component::stop   -> http.on_stop, redis.on_stop, postgres.on_stop
//!                   -> service.shutdown()
//! ```
//!
//! Ordering is registration order; there is no dependency-graph inference.
//! Every accessor for a live resource goes through an access guard and
//! fails with [`ComponentError::NotStarted`] outside the started window.

pub mod builder;
pub mod client;
pub mod component;
pub mod config;
pub mod container;
pub mod error;
pub mod harness;
pub mod service;
pub mod settings;

pub use builder::ComponentBuilder;
pub use client::http::{HttpClient, HttpClientHarness};
pub use client::rpc::{RpcChannel, RpcClientHarness, RpcError};
pub use component::{Component, ComponentContext};
pub use config::{ConfigPipeline, HostConfig};
pub use container::{
    ContainerDefinition, ContainerEndpoint, ContainerHarness, ProcessHandle, ProcessSpec,
};
pub use error::{ComponentError, StopFailure};
pub use harness::{Binding, Dependency, Harness};
pub use service::{EntryPoint, RouterEntryPoint, RunningService, ServeHandle};
pub use settings::Settings;
