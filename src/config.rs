//! Producer configuration.
//!
//! ```rust
//! use kafkaesque_bridge::config::ProducerConfig;
//!
//! let config = ProducerConfig::default();
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `CLIENT_ID` | `client_id` | `kafkaesque-bridge` |
//! | `BOOTSTRAP_SERVERS` | `bootstrap_servers` (comma separated) | `localhost:9092` |
//! | `QUEUE_BUFFERING_MAX_MESSAGES` | `queue_buffering_max_messages` | `100000` |
//! | `MESSAGE_MAX_BYTES` | `message_max_bytes` | `1048576` |
//! | `POLL_INTERVAL_MS` | `poll_interval` | `1000` |
//! | `FLUSH_TIMEOUT_MS` | `flush_timeout` | `10000` |
//! | `QUEUE_FULL_POLL_TIMEOUT_MS` | `queue_full_poll_timeout` | `1000` |
//! | `PARTITIONER` | `default_partitioner` | `round-robin` |

use std::time::Duration;

use crate::constants::{
    DEFAULT_BOOTSTRAP_SERVERS, DEFAULT_CLIENT_ID, DEFAULT_FLUSH_TIMEOUT_MS,
    DEFAULT_MESSAGE_MAX_BYTES, DEFAULT_POLL_INTERVAL_MS, DEFAULT_QUEUE_BUFFERING_MAX_MESSAGES,
    DEFAULT_QUEUE_FULL_POLL_TIMEOUT_MS,
};
use crate::error::{Error, Result};
pub use crate::partitioner::PartitionerKind;

/// Settings shared by the producer and its engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    pub client_id: String,
    pub bootstrap_servers: Vec<String>,
    /// Capacity of the engine's outbound queue.
    pub queue_buffering_max_messages: usize,
    /// Largest payload the engine accepts.
    pub message_max_bytes: usize,
    /// Cadence for callers that poll the engine in the background.
    pub poll_interval: Duration,
    /// Upper bound for the flush performed on close.
    pub flush_timeout: Duration,
    /// How long a queue-full rejection polls before returning.
    pub queue_full_poll_timeout: Duration,
    /// Partitioner for topics registered without an explicit one.
    pub default_partitioner: PartitionerKind,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            bootstrap_servers: vec![DEFAULT_BOOTSTRAP_SERVERS.to_string()],
            queue_buffering_max_messages: DEFAULT_QUEUE_BUFFERING_MAX_MESSAGES,
            message_max_bytes: DEFAULT_MESSAGE_MAX_BYTES,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            flush_timeout: Duration::from_millis(DEFAULT_FLUSH_TIMEOUT_MS),
            queue_full_poll_timeout: Duration::from_millis(DEFAULT_QUEUE_FULL_POLL_TIMEOUT_MS),
            default_partitioner: PartitionerKind::default(),
        }
    }
}

impl ProducerConfig {
    /// Create configuration from environment variables.
    ///
    /// Unset variables keep their defaults; malformed values are an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let client_id = lookup("CLIENT_ID").unwrap_or(defaults.client_id);

        let bootstrap_servers = match lookup("BOOTSTRAP_SERVERS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.bootstrap_servers,
        };

        let queue_buffering_max_messages = parse_var(
            &lookup,
            "QUEUE_BUFFERING_MAX_MESSAGES",
            defaults.queue_buffering_max_messages,
        )?;

        let message_max_bytes =
            parse_var(&lookup, "MESSAGE_MAX_BYTES", defaults.message_max_bytes)?;

        let poll_interval = Duration::from_millis(parse_var(
            &lookup,
            "POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
        )?);

        let flush_timeout = Duration::from_millis(parse_var(
            &lookup,
            "FLUSH_TIMEOUT_MS",
            DEFAULT_FLUSH_TIMEOUT_MS,
        )?);

        let queue_full_poll_timeout = Duration::from_millis(parse_var(
            &lookup,
            "QUEUE_FULL_POLL_TIMEOUT_MS",
            DEFAULT_QUEUE_FULL_POLL_TIMEOUT_MS,
        )?);

        let default_partitioner = match lookup("PARTITIONER") {
            Some(value) => value.parse().map_err(Error::Config)?,
            None => defaults.default_partitioner,
        };

        Ok(Self {
            client_id,
            bootstrap_servers,
            queue_buffering_max_messages,
            message_max_bytes,
            poll_interval,
            flush_timeout,
            queue_full_poll_timeout,
            default_partitioner,
        })
    }

    /// Validate the configuration and return any errors found.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.client_id.trim().is_empty() {
            errors.push("client_id must not be empty".to_string());
        }

        if self.bootstrap_servers.is_empty() {
            errors.push("bootstrap_servers must list at least one broker".to_string());
        }

        for server in &self.bootstrap_servers {
            if !server.contains(':') {
                errors.push(format!("bootstrap server '{}' must be host:port", server));
            }
        }

        if self.queue_buffering_max_messages == 0 {
            errors.push("queue_buffering_max_messages must be at least 1".to_string());
        }

        if self.message_max_bytes < 1024 {
            errors.push(format!(
                "message_max_bytes ({}) should be at least 1KB",
                self.message_max_bytes
            ));
        }

        if self.poll_interval.is_zero() {
            errors.push("poll_interval must be greater than zero".to_string());
        }

        if self.queue_full_poll_timeout > self.flush_timeout {
            errors.push(format!(
                "queue_full_poll_timeout ({:?}) must not exceed flush_timeout ({:?})",
                self.queue_full_poll_timeout, self.flush_timeout
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, folding every problem into one [`Error::Config`].
    pub fn validated(self) -> Result<Self> {
        self.validate()
            .map_err(|errors| Error::Config(errors.join("; ")))?;
        Ok(self)
    }
}

/// Per-topic settings chosen at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopicConfig {
    pub partitioner: PartitionerKind,
}

impl TopicConfig {
    pub fn with_partitioner(partitioner: PartitionerKind) -> Self {
        Self { partitioner }
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {}: {}", name, e))),
        None => Ok(default),
    }
}
