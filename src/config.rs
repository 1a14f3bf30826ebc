// src/config.rs
use std::time::Duration;

/// Connection and timeout settings for a `PgLedgerAdapter`. Constructed by
/// the embedding application; this crate never reads environment variables
/// itself.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    /// Applied as `SET statement_timeout` on every pooled connection so a
    /// wedged lock wait surfaces as a `LedgerError::Timeout` instead of
    /// hanging the caller indefinitely.
    pub statement_timeout: Duration,
}

impl LedgerConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            statement_timeout: Duration::from_secs(10),
        }
    }
}
