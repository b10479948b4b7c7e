//! Configuration for the gateway, loaded from environment variables with
//! sensible defaults.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener
    pub server: ServerConfig,
    /// Broker connection and publish settings
    pub kafka: KafkaConfig,
    /// Service that owns persisted purchases
    pub upstream: UpstreamConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Broker addresses (comma-separated)
    pub bootstrap_servers: String,
    /// Topic purchases are published to
    pub topic: String,
    /// Producer acknowledgement level
    pub producer_acks: String,
    /// Delivery timeout in milliseconds
    pub publish_timeout_ms: u64,
}

/// Read proxy upstream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the ledger service
    pub url: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

/// A variable was set to a value that does not parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid value for {key}: '{value}'")]
pub struct ConfigError {
    /// Variable name
    pub key: &'static str,
    /// Offending value
    pub value: String,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    /// if it is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a numeric variable does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            server: ServerConfig {
                host: text("HOST", "0.0.0.0"),
                port: parsed(&lookup, "PORT", 8080)?,
            },
            kafka: KafkaConfig {
                bootstrap_servers: text("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
                topic: text("KAFKA_TOPIC", "purchases.v1"),
                producer_acks: text("KAFKA_PRODUCER_ACKS", "all"),
                publish_timeout_ms: parsed(&lookup, "KAFKA_PUBLISH_TIMEOUT_MS", 5000)?,
            },
            upstream: UpstreamConfig {
                url: text("API_SERVER_URL", "http://localhost:8000"),
                timeout_ms: parsed(&lookup, "API_SERVER_TIMEOUT_MS", 10_000)?,
            },
        })
    }

    /// Address the HTTP server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Publish timeout as a [`Duration`].
    #[must_use]
    pub const fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka.publish_timeout_ms)
    }

    /// Upstream request timeout as a [`Duration`].
    #[must_use]
    pub const fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream.timeout_ms)
    }
}

fn parsed<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError { key, value }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.kafka.bootstrap_servers, "localhost:9092");
        assert_eq!(config.kafka.topic, "purchases.v1");
        assert_eq!(config.kafka.producer_acks, "all");
        assert_eq!(config.publish_timeout(), Duration::from_secs(5));
        assert_eq!(config.upstream.url, "http://localhost:8000");
        assert_eq!(config.upstream_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn variables_override_defaults() {
        let config = config_from(&[
            ("PORT", "9000"),
            ("KAFKA_BOOTSTRAP_SERVERS", "redpanda:9092"),
            ("API_SERVER_URL", "http://ledger:8000"),
            ("API_SERVER_TIMEOUT_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.kafka.bootstrap_servers, "redpanda:9092");
        assert_eq!(config.upstream.url, "http://ledger:8000");
        assert_eq!(config.upstream_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn invalid_number_is_an_error() {
        let err = config_from(&[("PORT", "eighty")]).unwrap_err();
        assert_eq!(err.key, "PORT");
        assert_eq!(err.value, "eighty");
    }
}
