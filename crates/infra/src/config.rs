//! Configuration loading and representation.

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_CLOSE_REASON: &str = "Order completed and delivered";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Runtime settings of the fulfillment engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentConfig {
    /// Postgres connection string; only needed by the Postgres store.
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Caller-side deadline for batches; `None` waits for every order.
    pub batch_deadline: Option<Duration>,
    pub close_reason: String,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            batch_deadline: None,
            close_reason: DEFAULT_CLOSE_REASON.to_string(),
        }
    }
}

impl FulfillmentConfig {
    /// Read `DATABASE_URL`, `CAFEFLOW_MAX_CONNECTIONS`,
    /// `CAFEFLOW_BATCH_DEADLINE_MS` and `CAFEFLOW_CLOSE_REASON`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_connections = match lookup("CAFEFLOW_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Invalid {
                    key: "CAFEFLOW_MAX_CONNECTIONS",
                    value: raw,
                })?,
            None => defaults.max_connections,
        };

        let batch_deadline = match lookup("CAFEFLOW_BATCH_DEADLINE_MS") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|ms| *ms > 0)
                    .map(Duration::from_millis)
                    .ok_or(ConfigError::Invalid {
                        key: "CAFEFLOW_BATCH_DEADLINE_MS",
                        value: raw,
                    })?,
            ),
            None => None,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            max_connections,
            batch_deadline,
            close_reason: lookup("CAFEFLOW_CLOSE_REASON")
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| defaults.close_reason),
        })
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_batch_deadline(mut self, deadline: Duration) -> Self {
        self.batch_deadline = Some(deadline);
        self
    }

    pub fn with_close_reason(mut self, reason: impl Into<String>) -> Self {
        self.close_reason = reason.into();
        self
    }
}
