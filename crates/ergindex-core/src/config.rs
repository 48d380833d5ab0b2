//! Indexer configuration.

use std::env;

use serde::{Deserialize, Serialize};

use crate::address::MAINNET_PREFIX;

/// Configuration for an indexer instance. Loaded once at startup; runtime
/// mutation is not supported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Base URL of the node HTTP API.
    pub node_url: String,
    /// Optional `api_key` header value.
    pub node_api_key: Option<String>,
    /// Tip probe cadence in milliseconds.
    pub poll_interval_ms: u64,
    /// Blocks per WorkPool batch.
    pub batch_size: u64,
    /// Maximum concurrent fetch/parse tasks.
    pub max_workers: usize,
    /// First height to ingest on a fresh store.
    pub initial_height: u64,
    /// Deepest reorg the pipeline will repair on its own.
    pub max_reorg_depth: u64,
    /// Per-block projection retries before a block is declared poison.
    pub max_block_retries: u32,
    /// Per-call deadline for node requests, milliseconds.
    pub request_timeout_ms: u64,
    /// Whether `block(id)`/`header(id)` responses are cached.
    pub cache_enabled: bool,
    /// Cache entry lifetime, seconds.
    pub cache_ttl_s: u64,
    /// Network prefix for address derivation (0x00 mainnet, 0x10 testnet).
    pub network_prefix: u8,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            node_url: "http://127.0.0.1:9053".into(),
            node_api_key: None,
            poll_interval_ms: 5000,
            batch_size: 20,
            max_workers: 5,
            initial_height: 0,
            max_reorg_depth: 720,
            max_block_retries: 5,
            request_timeout_ms: 30_000,
            cache_enabled: true,
            cache_ttl_s: 3600,
            network_prefix: MAINNET_PREFIX,
        }
    }
}

impl IndexerConfig {
    /// Build a config from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            node_url: env::var("NODE_URL").unwrap_or(defaults.node_url),
            node_api_key: env::var("NODE_API_KEY").ok().filter(|k| !k.is_empty()),
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", defaults.poll_interval_ms),
            batch_size: env_parse("BATCH_SIZE", defaults.batch_size).max(1),
            max_workers: env_parse("MAX_WORKERS", defaults.max_workers).max(1),
            initial_height: env_parse("INITIAL_HEIGHT", defaults.initial_height),
            max_reorg_depth: env_parse("MAX_REORG_DEPTH", defaults.max_reorg_depth),
            max_block_retries: env_parse("MAX_BLOCK_RETRIES", defaults.max_block_retries),
            request_timeout_ms: env_parse("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            cache_enabled: env_parse("CACHE_ENABLED", defaults.cache_enabled),
            cache_ttl_s: env_parse("CACHE_TTL_S", defaults.cache_ttl_s),
            network_prefix: env_parse("NETWORK_PREFIX", defaults.network_prefix),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
