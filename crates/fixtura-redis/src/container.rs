//! Redis and Redis Stack container definitions.

use fixtura_core::{ContainerDefinition, ContainerHarness, ProcessSpec, Settings};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::{ContainerRequest, GenericImage, ImageExt};
use testcontainers_modules::redis::Redis;

/// Port Redis listens on inside the container.
pub const REDIS_PORT: u16 = 6379;

const STACK_IMAGE: &str = "redis/redis-stack-server";
const STACK_TAG: &str = "latest";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Redis,
    Stack,
}

/// A Redis server container; `redis://<host>:<port>`.
#[derive(Debug, Clone)]
pub struct RedisDefinition {
    flavor: Flavor,
}

/// A harness owning one Redis container.
pub type RedisHarness = ContainerHarness<RedisDefinition>;

impl RedisDefinition {
    /// Plain Redis.
    pub fn redis() -> Self {
        Self {
            flavor: Flavor::Redis,
        }
    }

    /// Redis Stack (search, JSON, time series modules loaded).
    pub fn stack() -> Self {
        Self {
            flavor: Flavor::Stack,
        }
    }

    pub fn into_harness(self) -> RedisHarness {
        ContainerHarness::new(self)
    }
}

impl Default for RedisDefinition {
    fn default() -> Self {
        Self::redis()
    }
}

impl ContainerDefinition for RedisDefinition {
    fn kind(&self) -> &str {
        match self.flavor {
            Flavor::Redis => "redis",
            Flavor::Stack => "redis-stack",
        }
    }

    fn create_process(&self, settings: &Settings) -> Box<dyn ProcessSpec> {
        let tag = settings.image_tag(self.kind());
        match self.flavor {
            Flavor::Redis => {
                let request = match tag {
                    Some(tag) => Redis::default().with_tag(tag),
                    None => ContainerRequest::from(Redis::default()),
                };
                Box::new(request)
            }
            Flavor::Stack => {
                let image = GenericImage::new(STACK_IMAGE, STACK_TAG)
                    .with_exposed_port(REDIS_PORT.tcp())
                    .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
                let request = match tag {
                    Some(tag) => image.with_tag(tag),
                    None => ContainerRequest::from(image),
                };
                Box::new(request)
            }
        }
    }

    fn container_port(&self) -> u16 {
        REDIS_PORT
    }

    fn connection_string(&self, host: &str, port: u16) -> String {
        format!("redis://{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_flavor() {
        assert_eq!(RedisDefinition::redis().kind(), "redis");
        assert_eq!(RedisDefinition::stack().kind(), "redis-stack");
        assert_eq!(RedisDefinition::default().kind(), "redis");
    }

    #[test]
    fn connection_string_is_a_redis_url() {
        let definition = RedisDefinition::stack();
        assert_eq!(definition.container_port(), 6379);
        assert_eq!(
            definition.connection_string("localhost", 32768),
            "redis://localhost:32768"
        );
    }
}
