use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use fixtura_core::{EntryPoint, HostConfig, RouterEntryPoint};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;

use crate::messages::{HelloReply, HelloRequest, IncrementReply, IncrementRequest};

/// Connection-string names the service reads at boot.
pub const PEOPLE_DB: &str = "PeopleDb";
pub const REDIS: &str = "Redis";
pub const KAFKA: &str = "Kafka";

/// Topic every greeted name is published to.
pub const SAMPLE_TOPIC: &str = "sample-topic";

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Backends the service talks to. Each is present only when its
/// connection string was configured at boot.
#[derive(Clone, Default)]
pub struct AppState {
    people: Option<PgPool>,
    redis: Option<MultiplexedConnection>,
    producer: Option<FutureProducer>,
}

impl AppState {
    /// Open every backend named in `config`.
    pub async fn connect(config: &HostConfig) -> Result<Self> {
        let people = match config.connection_string(PEOPLE_DB) {
            Some(url) => Some(connect_people(url).await?),
            None => None,
        };

        let redis = match config.connection_string(REDIS) {
            Some(url) => {
                let client = redis::Client::open(url).with_context(|| format!("invalid redis url {url}"))?;
                Some(
                    client
                        .get_multiplexed_async_connection()
                        .await
                        .context("failed to connect to redis")?,
                )
            }
            None => None,
        };

        let producer = match config.connection_string(KAFKA) {
            Some(bootstrap) => Some(
                ClientConfig::new()
                    .set("bootstrap.servers", bootstrap)
                    .set("message.timeout.ms", PUBLISH_TIMEOUT.as_millis().to_string())
                    .create::<FutureProducer>()
                    .context("failed to create kafka producer")?,
            ),
            None => None,
        };

        tracing::info!(
            people = people.is_some(),
            redis = redis.is_some(),
            kafka = producer.is_some(),
            "sample backends connected"
        );
        Ok(Self {
            people,
            redis,
            producer,
        })
    }
}

async fn connect_people(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .context("failed to connect to people database")?;
    sqlx::query("CREATE TABLE IF NOT EXISTS people (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL)")
        .execute(&pool)
        .await
        .context("failed to create people table")?;
    Ok(pool)
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "Healthy" }))
        .route("/rpc/greeter.Greeter/SayHello", post(say_hello))
        .route("/rpc/counter.Counter/Increment", post(increment))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The sample service, ready to hand to a component builder.
pub fn entry_point() -> impl EntryPoint {
    RouterEntryPoint::new("sample", |config: HostConfig| async move {
        let state = AppState::connect(&config).await?;
        Ok::<_, anyhow::Error>(build_router(state))
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn say_hello(
    State(state): State<AppState>,
    Json(request): Json<HelloRequest>,
) -> Result<Json<HelloReply>, AppError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    if let Some(pool) = &state.people {
        sqlx::query("INSERT INTO people (name) VALUES ($1)")
            .bind(name)
            .execute(pool)
            .await
            .context("failed to store person")
            .map_err(AppError::internal)?;
    }

    if let Some(producer) = &state.producer {
        let record = FutureRecord::to(SAMPLE_TOPIC).key(name).payload(name);
        producer
            .send(record, Timeout::After(PUBLISH_TIMEOUT))
            .await
            .map_err(|(err, _)| AppError::internal(anyhow!(err).context("failed to publish greeting")))?;
    }

    tracing::debug!(name, "greeted");
    Ok(Json(HelloReply {
        message: format!("Hello {name}"),
    }))
}

async fn increment(
    State(state): State<AppState>,
    Json(request): Json<IncrementRequest>,
) -> Result<Json<IncrementReply>, AppError> {
    let Some(connection) = &state.redis else {
        return Err(AppError::unavailable("redis is not configured"));
    };
    let mut connection = connection.clone();
    let value: i64 = connection
        .incr(format!("counter:{}", request.key), 1)
        .await
        .context("failed to increment counter")
        .map_err(AppError::internal)?;
    Ok(Json(IncrementReply { value }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
