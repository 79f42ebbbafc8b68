//! Runtime configuration, read from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `STOCKFLOW_RETRY_MAX_RETRIES` | `3` |
//! | `STOCKFLOW_RETRY_BASE_DELAY_MS` | `5` |
//! | `STOCKFLOW_RETRY_MAX_DELAY_MS` | `100` |
//! | `STOCKFLOW_RESERVATION_MODE` | `transactional` |
//! | `DATABASE_URL` | unset (in-memory store) |

use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::services::ReservationMode;

pub const ENV_MAX_RETRIES: &str = "STOCKFLOW_RETRY_MAX_RETRIES";
pub const ENV_BASE_DELAY_MS: &str = "STOCKFLOW_RETRY_BASE_DELAY_MS";
pub const ENV_MAX_DELAY_MS: &str = "STOCKFLOW_RETRY_MAX_DELAY_MS";
pub const ENV_RESERVATION_MODE: &str = "STOCKFLOW_RESERVATION_MODE";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StockflowConfig {
    pub retry: RetryPolicy,
    pub reservation_mode: ReservationMode,
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
}

impl StockflowConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(raw) = get(ENV_MAX_RETRIES) {
            config.retry.max_retries = parse(ENV_MAX_RETRIES, &raw)?;
        }
        if let Some(raw) = get(ENV_BASE_DELAY_MS) {
            config.retry.base_delay = Duration::from_millis(parse(ENV_BASE_DELAY_MS, &raw)?);
        }
        if let Some(raw) = get(ENV_MAX_DELAY_MS) {
            config.retry.max_delay = Duration::from_millis(parse(ENV_MAX_DELAY_MS, &raw)?);
        }
        if config.retry.max_delay < config.retry.base_delay {
            return Err(ConfigError::Invalid {
                key: ENV_MAX_DELAY_MS,
                reason: "must not be smaller than the base delay".to_string(),
            });
        }
        if let Some(raw) = get(ENV_RESERVATION_MODE) {
            config.reservation_mode = raw.parse().map_err(|reason| ConfigError::Invalid {
                key: ENV_RESERVATION_MODE,
                reason,
            })?;
        }
        config.database_url = get(ENV_DATABASE_URL);

        Ok(config)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reservation_mode(mut self, mode: ReservationMode) -> Self {
        self.reservation_mode = mode;
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: format!("'{raw}': {e}"),
    })
}
