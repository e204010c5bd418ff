//! Scoped data-access sessions against a PostgreSQL harness.
//!
//! [`PgSessionHarness`] does not hold a pool for the whole fixture. Every
//! [`PgSessionHarness::execute`] call opens a pool, hands it to the unit of
//! work and closes it afterwards, so each unit of work sees a fresh session.
//!
//! Optionally the harness owns a database of its own on the server: it
//! creates it (and its schema) on start and drops it on stop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use fixtura_core::{Binding, ComponentContext, Dependency, Harness};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tokio_util::sync::CancellationToken;

use crate::container::PostgresHarness;

const MAINTENANCE_DATABASE: &str = "postgres";

/// How the schema is brought up after the database is created.
#[derive(Debug, Clone)]
pub enum Schema {
    /// Run pending migrations (typically `sqlx::migrate!()`).
    Migrator(&'static Migrator),
    /// Execute raw SQL statements in order.
    Statements(Vec<String>),
}

/// Opens one connection pool per unit of work against a peer PostgreSQL harness.
pub struct PgSessionHarness {
    name: String,
    binding: Binding,
    postgres: Arc<PostgresHarness>,
    database: Option<String>,
    max_connections: u32,
    acquire_timeout: Duration,
    ensure_created: Option<Schema>,
    drop_on_stop: bool,
}

impl PgSessionHarness {
    /// A session harness for the server owned by `postgres`, which must be
    /// registered earlier in the same component.
    pub fn new(postgres: Arc<PostgresHarness>) -> Self {
        Self {
            name: "pg-session".to_string(),
            binding: Binding::new(),
            postgres,
            database: None,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
            ensure_created: None,
            drop_on_stop: false,
        }
    }

    /// Target `database` instead of the one the server container was created with.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Create the database if it is missing and apply `schema` on start.
    pub fn ensure_created_on_start(mut self, schema: Schema) -> Self {
        self.ensure_created = Some(schema);
        self
    }

    /// Drop the database on stop. Refused for the maintenance database.
    pub fn drop_on_stop(mut self) -> Self {
        self.drop_on_stop = true;
        self
    }

    /// Name of the database sessions connect to.
    pub fn database(&self) -> &str {
        self.database
            .as_deref()
            .unwrap_or_else(|| self.postgres.definition().database())
    }

    /// Connection URL for the session database. Guarded.
    pub fn connection_string(&self) -> Result<String> {
        self.binding.guard(&self.name)?;
        self.url_for(self.database())
    }

    /// Open a pool for one unit of work. The caller owns and closes it.
    pub async fn open_pool(&self) -> Result<PgPool> {
        self.binding.guard(&self.name)?;
        let url = self.url_for(self.database())?;
        self.connect(&url, self.max_connections).await
    }

    /// Run `work` against a fresh pool and close the pool afterwards.
    pub async fn execute<F, Fut, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce(PgPool) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let pool = self.open_pool().await?;
        let outcome = work(pool.clone()).await;
        pool.close().await;
        outcome
    }

    fn url_for(&self, database: &str) -> Result<String> {
        let endpoint = self
            .postgres
            .endpoint()
            .context("postgres harness must be registered and started before the session harness")?;
        Ok(self
            .postgres
            .definition()
            .url_for(&endpoint.host, endpoint.port, database))
    }

    async fn connect(&self, url: &str, max_connections: u32) -> Result<PgPool> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(url)
            .await
            .with_context(|| format!("failed to connect to database {}", self.database()))
    }

    async fn maintenance_pool(&self) -> Result<PgPool> {
        let url = self.url_for(MAINTENANCE_DATABASE)?;
        self.connect(&url, 1).await
    }

    /// Create the session database if it does not exist yet.
    async fn ensure_database_exists(&self) -> Result<()> {
        let db_name = self.database();
        validate_database_name(db_name)?;
        let maint_pool = self.maintenance_pool().await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(db_name)
                .fetch_one(&maint_pool)
                .await
                .context("failed to query pg_database")?;

        if exists {
            tracing::info!(db = db_name, "database already exists");
        } else {
            let stmt = format!("CREATE DATABASE {db_name}");
            maint_pool
                .execute(stmt.as_str())
                .await
                .with_context(|| format!("failed to create database {db_name}"))?;
            tracing::info!(db = db_name, "database created");
        }

        maint_pool.close().await;
        Ok(())
    }

    async fn apply_schema(&self, schema: &Schema) -> Result<()> {
        let url = self.url_for(self.database())?;
        let pool = self.connect(&url, 1).await?;
        let applied = match schema {
            Schema::Migrator(migrator) => migrator
                .run(&pool)
                .await
                .context("failed to run database migrations"),
            Schema::Statements(statements) => {
                let mut result = Ok(());
                for statement in statements {
                    if let Err(e) = pool.execute(statement.as_str()).await {
                        result = Err(e).with_context(|| format!("failed to execute {statement:?}"));
                        break;
                    }
                }
                result
            }
        };
        pool.close().await;
        applied?;
        tracing::info!(db = self.database(), "schema applied");
        Ok(())
    }

    /// Terminate open sessions and drop the session database.
    async fn drop_database(&self) -> Result<()> {
        let db_name = self.database();
        validate_database_name(db_name)?;
        if db_name == MAINTENANCE_DATABASE {
            bail!("refusing to drop the maintenance database");
        }
        let maint_pool = self.maintenance_pool().await?;

        sqlx::query(
            "SELECT pg_terminate_backend(pid) \
             FROM pg_stat_activity \
             WHERE datname = $1 AND pid <> pg_backend_pid()",
        )
        .bind(db_name)
        .execute(&maint_pool)
        .await
        .context("failed to terminate open sessions")?;

        let stmt = format!("DROP DATABASE IF EXISTS {db_name}");
        let dropped = maint_pool
            .execute(stmt.as_str())
            .await
            .with_context(|| format!("failed to drop database {db_name}"));
        maint_pool.close().await;
        dropped?;

        tracing::info!(db = db_name, "database dropped");
        Ok(())
    }
}

/// Database names cannot be bound as parameters in DDL, so only plain
/// identifiers are accepted.
fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty()
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        || name.starts_with(|c: char| c.is_ascii_digit())
    {
        bail!("database name {name:?} contains invalid characters");
    }
    Ok(())
}

#[async_trait]
impl Dependency for PgSessionHarness {
    fn name(&self) -> &str {
        &self.name
    }

    fn binding(&self) -> &Binding {
        &self.binding
    }

    async fn on_start(&self, _ctx: &ComponentContext, _cancel: &CancellationToken) -> Result<()> {
        let Some(schema) = &self.ensure_created else {
            return Ok(());
        };
        self.ensure_database_exists().await?;
        self.apply_schema(schema).await
    }

    async fn on_stop(&self, _ctx: &ComponentContext, _cancel: &CancellationToken) -> Result<()> {
        if self.drop_on_stop {
            self.drop_database().await?;
        }
        Ok(())
    }
}

impl Harness for PgSessionHarness {}
