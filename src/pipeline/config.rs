//! Aggregation configuration from environment variables

use super::error::ConfigError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Bucket time zone offset: UTC+8 (Beijing time)
pub const BUCKET_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Bucket format, `yyyyMMddHHmmss`
pub const BUCKET_FORMAT: &str = "%Y%m%d%H%M%S";

/// Where exported payloads are written
#[derive(Debug, Clone, PartialEq)]
pub enum CacheBackend {
    Memory,
    Jsonl(PathBuf),
}

/// Configuration for the aggregation stage
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Export interval and sleep duration, seconds (`PERIOD`)
    pub period_secs: u64,

    /// TTL multiplier applied to the period (`NUMBERS`)
    pub ttl_multiplier: u64,

    /// Counter value on first sight of a triple (`BASE`)
    pub counter_base: u64,

    /// Per-occurrence step after the first sight (`INCREMENT`)
    pub counter_increment: u64,

    /// Log a checkpoint every N successfully processed messages
    pub checkpoint_every: u64,

    /// Inbound channel capacity (messages)
    pub channel_buffer: usize,

    pub cache_backend: CacheBackend,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            period_secs: 60,
            ttl_multiplier: 3,
            counter_base: 1,
            counter_increment: 1,
            checkpoint_every: 10_000,
            channel_buffer: 10_000,
            cache_backend: CacheBackend::Memory,
        }
    }
}

impl AggregationConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `CR_EXPORT_PERIOD_SECS` (default: 60)
    /// - `CR_TTL_MULTIPLIER` (default: 3)
    /// - `CR_COUNTER_BASE` (default: 1)
    /// - `CR_COUNTER_INCREMENT` (default: 1)
    /// - `CR_CHECKPOINT_EVERY` (default: 10000)
    /// - `CR_CHANNEL_BUFFER` (default: 10000)
    /// - `CR_CACHE_BACKEND` (default: memory; `jsonl` writes to `CR_CACHE_JSONL_PATH`)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cache_backend = match env::var("CR_CACHE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "jsonl" => CacheBackend::Jsonl(
                env::var("CR_CACHE_JSONL_PATH")
                    .unwrap_or_else(|_| "cache/cr_aggregation.jsonl".to_string())
                    .into(),
            ),
            "memory" => CacheBackend::Memory,
            other => {
                log::warn!("Invalid CR_CACHE_BACKEND '{}', defaulting to memory", other);
                CacheBackend::Memory
            }
        };

        Self {
            period_secs: parse_var("CR_EXPORT_PERIOD_SECS", defaults.period_secs),
            ttl_multiplier: parse_var("CR_TTL_MULTIPLIER", defaults.ttl_multiplier),
            counter_base: parse_var("CR_COUNTER_BASE", defaults.counter_base),
            counter_increment: parse_var("CR_COUNTER_INCREMENT", defaults.counter_increment),
            checkpoint_every: parse_var("CR_CHECKPOINT_EVERY", defaults.checkpoint_every),
            channel_buffer: parse_var("CR_CHANNEL_BUFFER", defaults.channel_buffer),
            cache_backend,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "CR_EXPORT_PERIOD_SECS must be greater than 0".to_string(),
            ));
        }
        if self.ttl_multiplier == 0 {
            return Err(ConfigError::InvalidValue(
                "CR_TTL_MULTIPLIER must be greater than 0".to_string(),
            ));
        }
        if self.checkpoint_every == 0 {
            return Err(ConfigError::InvalidValue(
                "CR_CHECKPOINT_EVERY must be greater than 0".to_string(),
            ));
        }
        if self.channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "CR_CHANNEL_BUFFER must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    /// Time-to-live of exported payloads: `PERIOD * NUMBERS`
    pub fn ttl_secs(&self) -> u64 {
        self.period_secs.saturating_mul(self.ttl_multiplier)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Invalid {} '{}', using default", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}
