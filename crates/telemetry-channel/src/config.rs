// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the channel group and its channels.
//!
//! Values are resolved in this order (later wins):
//!
//! 1. **Defaults** - [`Config::default`] and [`ChannelConfiguration::default`]
//! 2. **Environment variables** - `TELEMETRY_*`, read by [`Config::from_env`]
//!
//! Parsing is lenient: a value that cannot be parsed falls back to its default
//! with a debug log. Values that parse but make no sense (a batch size of zero,
//! a compression level zstd rejects) are reported as [`ConfigError`].

use serde::{Deserialize, Deserializer};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::errors::ConfigError;
use crate::retry::RetryPolicy;

pub const DEFAULT_MAX_LOGS_PER_BATCH: usize = 50;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_IN_FLIGHT_BATCHES: usize = 3;
pub const DEFAULT_MAX_STORAGE_CAPACITY: usize = 10_000;

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8126/api/v2/logs";
const DEFAULT_API_KEY_HEADER: &str = "X-Api-Key";
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_TERMINATION_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-channel flush and capacity policy. Immutable once the channel exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelConfiguration {
    pub max_logs_per_batch: usize,
    #[serde(rename = "flush_interval_ms", deserialize_with = "deserialize_millis")]
    pub flush_interval: Duration,
    pub max_in_flight_batches: usize,
    /// Maximum number of persisted entries before the oldest are evicted.
    pub max_storage_capacity: usize,
}

impl Default for ChannelConfiguration {
    fn default() -> Self {
        ChannelConfiguration {
            max_logs_per_batch: DEFAULT_MAX_LOGS_PER_BATCH,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_in_flight_batches: DEFAULT_MAX_IN_FLIGHT_BATCHES,
            max_storage_capacity: DEFAULT_MAX_STORAGE_CAPACITY,
        }
    }
}

impl ChannelConfiguration {
    #[must_use]
    pub fn new(
        max_logs_per_batch: usize,
        flush_interval: Duration,
        max_in_flight_batches: usize,
        max_storage_capacity: usize,
    ) -> Self {
        ChannelConfiguration {
            max_logs_per_batch,
            flush_interval,
            max_in_flight_batches,
            max_storage_capacity,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, u128); 4] = [
            ("max_logs_per_batch", self.max_logs_per_batch as u128),
            ("flush_interval", self.flush_interval.as_millis()),
            ("max_in_flight_batches", self.max_in_flight_batches as u128),
            ("max_storage_capacity", self.max_storage_capacity as u128),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: value.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// Group-wide settings: where batches go and how failures are retried.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_key_header: String,
    pub use_compression: bool,
    pub compression_level: i32,
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
    /// Upper bound for the final flush attempted when the app terminates.
    pub termination_flush_timeout: Duration,
    /// Directory of the durable store. `None` keeps logs in memory only.
    pub storage_path: Option<PathBuf>,
    pub default_channel: ChannelConfiguration,
    /// `EnvFilter` directive used by [`crate::logger::init_from_config`].
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            use_compression: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            termination_flush_timeout: DEFAULT_TERMINATION_FLUSH_TIMEOUT,
            storage_path: None,
            default_channel: ChannelConfiguration::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if let Some(endpoint) = env_string("TELEMETRY_ENDPOINT") {
            config.endpoint = normalize_endpoint(&endpoint);
        }
        config.api_key = env_string("TELEMETRY_API_KEY");
        if let Some(header) = env_string("TELEMETRY_API_KEY_HEADER") {
            config.api_key_header = header;
        }
        if let Some(level) = env_string("TELEMETRY_LOG_LEVEL") {
            config.log_level = level.to_lowercase();
        }
        config.storage_path = env_string("TELEMETRY_STORAGE_PATH").map(PathBuf::from);

        config.use_compression = env_bool("TELEMETRY_USE_COMPRESSION", config.use_compression);
        config.compression_level =
            env_parse("TELEMETRY_COMPRESSION_LEVEL", config.compression_level);
        if !(1..=22).contains(&config.compression_level) {
            return Err(ConfigError::InvalidValue {
                key: "TELEMETRY_COMPRESSION_LEVEL",
                value: config.compression_level.to_string(),
                reason: "zstd levels range from 1 to 22".to_string(),
            });
        }

        config.request_timeout = env_millis("TELEMETRY_REQUEST_TIMEOUT_MS", config.request_timeout);
        config.termination_flush_timeout = env_millis(
            "TELEMETRY_TERMINATION_FLUSH_TIMEOUT_MS",
            config.termination_flush_timeout,
        );

        let defaults = RetryPolicy::default();
        config.retry_policy = RetryPolicy::new(
            env_millis("TELEMETRY_RETRY_BASE_DELAY_MS", defaults.base_delay),
            env_millis("TELEMETRY_RETRY_MAX_DELAY_MS", defaults.max_delay),
            env_bool("TELEMETRY_RETRY_JITTER", defaults.jitter),
        );

        let channel = &mut config.default_channel;
        channel.max_logs_per_batch = env_parse("TELEMETRY_BATCH_SIZE", channel.max_logs_per_batch);
        channel.flush_interval = env_millis("TELEMETRY_FLUSH_INTERVAL_MS", channel.flush_interval);
        channel.max_in_flight_batches =
            env_parse("TELEMETRY_MAX_IN_FLIGHT_BATCHES", channel.max_in_flight_batches);
        channel.max_storage_capacity =
            env_parse("TELEMETRY_STORAGE_CAPACITY", channel.max_storage_capacity);
        channel.validate()?;

        Ok(config)
    }
}

/// Adds `https://` when the endpoint has no scheme.
fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env_string(key) {
        None => default,
        Some(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            debug!("Ignoring unparsable value '{raw}' for {key}, using default");
            default
        }),
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    match env_string(key) {
        None => default,
        Some(raw) => match raw.parse::<u64>() {
            Ok(millis) if millis > 0 => Duration::from_millis(millis),
            _ => {
                debug!("Ignoring invalid duration '{raw}' for {key}, using default");
                default
            }
        },
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_string(key).map(|value| value.to_lowercase()) {
        None => default,
        Some(value) => match value.as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                debug!("Ignoring invalid boolean '{value}' for {key}, using default");
                default
            }
        },
    }
}
