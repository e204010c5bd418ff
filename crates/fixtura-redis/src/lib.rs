//! Redis harnesses for fixtura.
//!
//! - [`RedisHarness`]: an ephemeral Redis or Redis Stack container.
//! - [`RedisDatabaseHarness`]: one multiplexed connection to it, optionally
//!   namespaced by a key prefix.

pub mod container;
pub mod database;

pub use container::{REDIS_PORT, RedisDefinition, RedisHarness};
pub use database::RedisDatabaseHarness;
