use anyhow::Context;
use config::{Config, Environment};
use serde::Deserialize;

use crate::catalog_store::PostgresConfig;

/// Service settings, read from environment variables such as `DB_HOST` or `USE_IN_MEMORY_DB`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppSettings {
    pub use_in_memory_db: bool,
    pub db_host: String,
    pub db_username: String,
    pub db_password: String,
    pub port: u16,
    pub history_page_size: usize,
}

impl AppSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_environment(Environment::default())
    }

    fn from_environment(environment: Environment) -> anyhow::Result<Self> {
        Config::builder()
            .set_default("use_in_memory_db", false)?
            .set_default("db_host", "127.0.0.1")?
            .set_default("db_username", "postgres")?
            .set_default("db_password", "postgres")?
            .set_default("port", 8080_i64)?
            .set_default("history_page_size", 10_i64)?
            .add_source(environment.try_parsing(true))
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Failed to deserialize settings")
    }

    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            hostname: self.db_host.clone(),
            username: self.db_username.clone(),
            password: self.db_password.clone(),
        }
    }
}
