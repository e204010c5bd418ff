//! PostgreSQL harnesses for fixtura.
//!
//! - [`PostgresHarness`]: an ephemeral PostgreSQL server container.
//! - [`PgSessionHarness`]: per-unit-of-work pools against that server, with
//!   optional create-on-start / drop-on-stop of a dedicated database.
//!
//! ```ignore
//! let postgres = Arc::new(
//!     PostgresDefinition::new()
//!         .into_harness()
//!         .with_connection_name("PeopleDb"),
//! );
//! let sessions = Arc::new(
//!     PgSessionHarness::new(Arc::clone(&postgres))
//!         .ensure_created_on_start(Schema::Migrator(&MIGRATOR)),
//! );
//! let component = ComponentBuilder::create(entry)
//!     .add_harness(postgres)
//!     .add_harness(sessions)
//!     .build();
//! ```

pub mod container;
pub mod session;

pub use container::{POSTGRES_PORT, PostgresDefinition, PostgresHarness};
pub use session::{PgSessionHarness, Schema};
