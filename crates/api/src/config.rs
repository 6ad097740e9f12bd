//! Server configuration from environment variables

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to, e.g. `0.0.0.0:8080`.
    pub bind_address: String,
    /// Postgres connection string for the document store.
    pub database_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        Ok(Self {
            bind_address,
            database_url,
        })
    }
}
