//! Configuration Module
//!
//! Handles loading and managing engine configuration from environment variables.

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Engine configuration parameters.
///
/// Supplied once when the engine is built and never mutated afterwards.
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Whether TTLs passed to `set` are tracked at all
    pub enable_ttl: bool,
    /// Maximum key length in characters
    pub max_key_length: usize,
    /// Capacity of the in-memory backend before LRU eviction kicks in
    pub max_items_per_backend: usize,
    /// Fan batch operations out concurrently instead of key by key
    pub enable_batching: bool,
    /// Emit a warning every time a backend falls back to another one
    pub log_fallbacks: bool,
    /// How long a backend stays out of rotation after a failed write, in milliseconds
    pub backend_retry_ms: u64,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_ENABLE_TTL` - Track TTLs (default: true)
    /// - `CACHE_MAX_KEY_LENGTH` - Maximum key length (default: 256)
    /// - `CACHE_MAX_ITEMS_PER_BACKEND` - Memory backend capacity (default: 1000)
    /// - `CACHE_ENABLE_BATCHING` - Concurrent batch fan-out (default: true)
    /// - `CACHE_LOG_FALLBACKS` - Log backend fallbacks (default: true)
    /// - `CACHE_BACKEND_RETRY_MS` - Hold-down after a failed write (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enable_ttl: env_or("CACHE_ENABLE_TTL", defaults.enable_ttl),
            max_key_length: env_or("CACHE_MAX_KEY_LENGTH", defaults.max_key_length),
            max_items_per_backend: env_or(
                "CACHE_MAX_ITEMS_PER_BACKEND",
                defaults.max_items_per_backend,
            ),
            enable_batching: env_or("CACHE_ENABLE_BATCHING", defaults.enable_batching),
            log_fallbacks: env_or("CACHE_LOG_FALLBACKS", defaults.log_fallbacks),
            backend_retry_ms: env_or("CACHE_BACKEND_RETRY_MS", defaults.backend_retry_ms),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_ttl: true,
            max_key_length: 256,
            max_items_per_backend: 1000,
            enable_batching: true,
            log_fallbacks: true,
            backend_retry_ms: 1000,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
