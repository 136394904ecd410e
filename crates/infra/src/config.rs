//! Engine configuration loaded from the environment.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use irongate_identity::DomainPolicy;

use crate::retry::RetryPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got '{value}'")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub retry: RetryPolicy,
    pub command_timeout: Duration,
    pub domain_policy: DomainPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 5,
            retry: RetryPolicy::default(),
            command_timeout: Duration::from_millis(5000),
            domain_policy: DomainPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Reads:
    /// - `DATABASE_URL`
    /// - `IRONGATE_DB_MAX_CONNECTIONS` (5)
    /// - `IRONGATE_MAX_CONFLICT_RETRIES` (3)
    /// - `IRONGATE_RETRY_BACKOFF_MS` (10)
    /// - `IRONGATE_COMMAND_TIMEOUT_MS` (5000)
    /// - `IRONGATE_USER_LOGIN_MUST_BE_DOMAIN` (true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if database_url.is_none() {
            warn!("DATABASE_URL not set; events are kept in memory");
        }

        let db_max_connections = parse(&lookup, "IRONGATE_DB_MAX_CONNECTIONS", "a positive integer")?
            .unwrap_or(defaults.db_max_connections);
        if db_max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "IRONGATE_DB_MAX_CONNECTIONS",
                expected: "a positive integer",
                value: "0".into(),
            });
        }

        let max_retries = parse(&lookup, "IRONGATE_MAX_CONFLICT_RETRIES", "an integer")?
            .unwrap_or(defaults.retry.max_retries);
        let backoff = parse::<u64>(&lookup, "IRONGATE_RETRY_BACKOFF_MS", "milliseconds")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry.backoff);
        let command_timeout = parse::<u64>(&lookup, "IRONGATE_COMMAND_TIMEOUT_MS", "milliseconds")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.command_timeout);
        let user_login_must_be_domain = parse_bool(&lookup, "IRONGATE_USER_LOGIN_MUST_BE_DOMAIN")?
            .unwrap_or(defaults.domain_policy.user_login_must_be_domain);

        Ok(Self {
            database_url,
            db_max_connections,
            retry: RetryPolicy { max_retries, backoff },
            command_timeout,
            domain_policy: DomainPolicy {
                user_login_must_be_domain,
            },
        })
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid {
            key,
            expected,
            value: raw,
        })
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(Some(true)),
        "0" | "false" | "no" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid {
            key,
            expected: "a boolean",
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        assert_eq!(load(&[]).unwrap(), EngineConfig::default());
    }

    #[test]
    fn values_are_read() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/iam"),
            ("IRONGATE_DB_MAX_CONNECTIONS", "12"),
            ("IRONGATE_MAX_CONFLICT_RETRIES", "0"),
            ("IRONGATE_RETRY_BACKOFF_MS", "25"),
            ("IRONGATE_COMMAND_TIMEOUT_MS", "100"),
            ("IRONGATE_USER_LOGIN_MUST_BE_DOMAIN", "false"),
        ])
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/iam"));
        assert_eq!(config.db_max_connections, 12);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.backoff, Duration::from_millis(25));
        assert_eq!(config.command_timeout, Duration::from_millis(100));
        assert!(!config.domain_policy.user_login_must_be_domain);
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        assert_eq!(load(&[("DATABASE_URL", "  ")]).unwrap().database_url, None);
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = load(&[("IRONGATE_RETRY_BACKOFF_MS", "soon")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "IRONGATE_RETRY_BACKOFF_MS",
                expected: "milliseconds",
                value: "soon".into(),
            }
        );

        assert!(load(&[("IRONGATE_USER_LOGIN_MUST_BE_DOMAIN", "maybe")]).is_err());
        assert!(load(&[("IRONGATE_DB_MAX_CONNECTIONS", "0")]).is_err());
    }
}
