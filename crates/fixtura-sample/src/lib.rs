//! A small service used to exercise fixtura end to end.
//!
//! Routes:
//! - `GET /health` returns `Healthy`
//! - `POST /rpc/greeter.Greeter/SayHello` stores the name in `PeopleDb`,
//!   publishes it to `sample-topic` and replies `Hello <name>`
//! - `POST /rpc/counter.Counter/Increment` increments `counter:<key>` in Redis
//!
//! Every backend is optional and used only when its connection string
//! (`ConnectionStrings:PeopleDb`, `ConnectionStrings:Redis`,
//! `ConnectionStrings:Kafka`) is present at boot.

pub mod app;
pub mod client;
pub mod messages;

pub use app::{AppError, AppState, KAFKA, PEOPLE_DB, REDIS, SAMPLE_TOPIC, build_router, entry_point};
pub use client::{CounterClient, GreeterClient};
pub use messages::{HelloReply, HelloRequest, IncrementReply, IncrementRequest};
