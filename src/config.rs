use std::{str::FromStr, time::Duration};

use thiserror::Error;

const DEFAULT_SEND_TIMEOUT_MS: u64 = 5000;
const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    /// Upper bound on a single outbound send before the connection counts as dead.
    pub send_timeout: Duration,
    /// How long a fresh connection may go without sending its first frame.
    pub join_timeout: Duration,
    pub outbound_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8000,
            database_url: "sqlite://chat.db?mode=rwc".to_owned(),
            db_max_connections: 16,
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            join_timeout: Duration::from_secs(DEFAULT_JOIN_TIMEOUT_SECS),
            outbound_queue: 64,
        }
    }
}

impl Config {
    /// Reads the process environment, with `.env` as a fallback source.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &'static str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            host: get("APP_HOST").unwrap_or(defaults.host),
            port: parse(get("APP_PORT"), "APP_PORT", defaults.port)?,
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections: parse(
                get("DB_MAX_CONNECTIONS"),
                "DB_MAX_CONNECTIONS",
                defaults.db_max_connections,
            )?,
            send_timeout: Duration::from_millis(parse(
                get("SEND_TIMEOUT_MS"),
                "SEND_TIMEOUT_MS",
                DEFAULT_SEND_TIMEOUT_MS,
            )?),
            join_timeout: Duration::from_secs(parse(
                get("JOIN_TIMEOUT_SECS"),
                "JOIN_TIMEOUT_SECS",
                DEFAULT_JOIN_TIMEOUT_SECS,
            )?),
            outbound_queue: parse(get("OUTBOUND_QUEUE"), "OUTBOUND_QUEUE", defaults.outbound_queue)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T: FromStr>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(parsed),
            Err(_) => Err(ConfigError::Invalid { key, value }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert_eq!(config.join_timeout, Duration::from_secs(30));
        assert_eq!(config.outbound_queue, 64);
    }

    #[test]
    fn values_are_read_from_the_environment() {
        let config = config_from(&[
            ("APP_HOST", "127.0.0.1"),
            ("APP_PORT", "9001"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("SEND_TIMEOUT_MS", "250"),
            ("JOIN_TIMEOUT_SECS", "3"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr(), "127.0.0.1:9001");
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.send_timeout, Duration::from_millis(250));
        assert_eq!(config.join_timeout, Duration::from_secs(3));
    }

    #[test]
    fn unparsable_value_names_the_key() {
        let err = config_from(&[("APP_PORT", "eighty")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid { key: "APP_PORT", value: "eighty".to_owned() }
        );
        assert!(err.to_string().contains("APP_PORT"));
    }
}
