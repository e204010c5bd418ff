//! The PostgreSQL container definition.

use std::collections::BTreeMap;

use fixtura_core::{ContainerDefinition, ContainerHarness, ProcessSpec, Settings};
use testcontainers::{ContainerRequest, ImageExt};
use testcontainers_modules::postgres::Postgres;

/// Port PostgreSQL listens on inside the container.
pub const POSTGRES_PORT: u16 = 5432;

const DEFAULT_CREDENTIAL: &str = "postgres";

/// A PostgreSQL server container.
///
/// Connection string:
/// `postgresql://<user>:<password>@<host>:<port>/<database>[?k=v&...]`
#[derive(Debug, Clone)]
pub struct PostgresDefinition {
    username: String,
    password: String,
    database: String,
    properties: BTreeMap<String, String>,
}

/// A harness owning one PostgreSQL container.
pub type PostgresHarness = ContainerHarness<PostgresDefinition>;

impl PostgresDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Extra connection property appended as a query parameter (e.g. `sslmode=disable`).
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// URL for `database` on the server reachable at `host:port`.
    pub fn url_for(&self, host: &str, port: u16, database: &str) -> String {
        let mut url = format!(
            "postgresql://{}:{}@{host}:{port}/{database}",
            self.username, self.password
        );
        if !self.properties.is_empty() {
            let query: Vec<String> = self
                .properties
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }

    /// Wrap this definition in a harness.
    pub fn into_harness(self) -> PostgresHarness {
        ContainerHarness::new(self)
    }
}

impl Default for PostgresDefinition {
    fn default() -> Self {
        Self {
            username: DEFAULT_CREDENTIAL.to_string(),
            password: DEFAULT_CREDENTIAL.to_string(),
            database: DEFAULT_CREDENTIAL.to_string(),
            properties: BTreeMap::new(),
        }
    }
}

impl ContainerDefinition for PostgresDefinition {
    fn kind(&self) -> &str {
        "postgres"
    }

    fn create_process(&self, settings: &Settings) -> Box<dyn ProcessSpec> {
        let image = Postgres::default()
            .with_user(&self.username)
            .with_password(&self.password)
            .with_db_name(&self.database);
        let request = match settings.image_tag(self.kind()) {
            Some(tag) => image.with_tag(tag),
            None => ContainerRequest::from(image),
        };
        Box::new(request)
    }

    fn container_port(&self) -> u16 {
        POSTGRES_PORT
    }

    fn connection_string(&self, host: &str, port: u16) -> String {
        self.url_for(host, port, &self.database)
    }
}
