//! HTTP client for the node REST API, backed by `reqwest`.
//!
//! All methods are idempotent GETs. Transient failures (network errors, 5xx)
//! retry with exponential backoff; 4xx surfaces immediately as `NotFound` /
//! `BadRequest`. `block(id)` and `header(id)` are read-through cached when
//! the cache is enabled — those responses are keyed by content hash and
//! immutable, while tip probes (`info`, `block_ids_at`) are never cached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use ergindex_core::error::NodeError;
use ergindex_core::metrics::Metrics;
use ergindex_core::wire::{NodeInfo, WireFullBlock, WireHeader, WireTransaction};
use ergindex_core::IndexerConfig;

use crate::cache::TtlCache;
use crate::retry::{RetryConfig, RetryPolicy};

const CACHE_MAX_ENTRIES: usize = 4096;

/// What the pipeline consumes from the node. Production uses [`NodeClient`];
/// tests use scripted implementations.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// `/info` — node state including the best full height.
    async fn info(&self) -> Result<NodeInfo, NodeError>;

    /// `/blocks/at/{height}` — ids of all known headers at a height, the
    /// canonical one first. Empty when the node hasn't seen the height.
    async fn block_ids_at(&self, height: u64) -> Result<Vec<String>, NodeError>;

    /// `/blocks/{id}/header`.
    async fn header(&self, block_id: &str) -> Result<WireHeader, NodeError>;

    /// `/blocks/{id}` — full block with transactions.
    async fn block(&self, block_id: &str) -> Result<WireFullBlock, NodeError>;

    /// `/transactions/unconfirmed` — mempool passthrough, not indexed.
    async fn unconfirmed_transactions(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<WireTransaction>, NodeError>;

    /// Main-chain header at a height: the first id from
    /// [`NodeApi::block_ids_at`], resolved through [`NodeApi::header`].
    async fn header_at(&self, height: u64) -> Result<WireHeader, NodeError> {
        let ids = self.block_ids_at(height).await?;
        let id = ids
            .first()
            .ok_or_else(|| NodeError::NotFound(format!("no headers at height {height}")))?;
        self.header(id).await
    }
}

/// Production node client.
pub struct NodeClient {
    base_url: String,
    http: reqwest::Client,
    api_key: Option<String>,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
    block_cache: Option<TtlCache<WireFullBlock>>,
    header_cache: Option<TtlCache<WireHeader>>,
}

impl NodeClient {
    pub fn new(config: &IndexerConfig, metrics: Arc<Metrics>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .expect("failed to build reqwest client");

        let ttl = Duration::from_secs(config.cache_ttl_s);
        let (block_cache, header_cache) = if config.cache_enabled {
            (
                Some(TtlCache::new(ttl, CACHE_MAX_ENTRIES)),
                Some(TtlCache::new(ttl, CACHE_MAX_ENTRIES)),
            )
        } else {
            (None, None)
        };

        Self {
            base_url: config.node_url.trim_end_matches('/').to_string(),
            http,
            api_key: config.node_api_key.clone(),
            retry: RetryPolicy::new(RetryConfig::default()),
            metrics,
            block_cache,
            header_cache,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, NodeError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            Metrics::incr(&self.metrics.node_requests_total);
            match self.send_once::<T>(&url).await {
                Ok(value) => return Ok(value),
                Err(Failure::Final(err)) => return Err(err),
                Err(Failure::Retryable(reason)) => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            %reason,
                            path,
                            "retrying node request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        Metrics::incr(&self.metrics.node_request_failures_total);
                        tracing::error!(attempt, %reason, path, "node request exhausted retries");
                        return Err(NodeError::Unavailable {
                            attempts: attempt,
                            reason,
                        });
                    }
                },
            }
        }
    }

    async fn send_once<T: DeserializeOwned>(&self, url: &str) -> Result<T, Failure> {
        let mut request = self.http.get(url).header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("api_key", key.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Failure::Retryable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| Failure::Final(NodeError::InvalidResponse(e.to_string())));
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 404 {
            Err(Failure::Final(NodeError::NotFound(url.to_string())))
        } else if status.is_client_error() {
            Err(Failure::Final(NodeError::BadRequest {
                status: status.as_u16(),
                reason: body,
            }))
        } else {
            Err(Failure::Retryable(format!("HTTP {status}: {body}")))
        }
    }
}

enum Failure {
    /// Worth retrying: network error or 5xx.
    Retryable(String),
    /// Retrying won't change the answer.
    Final(NodeError),
}

#[async_trait]
impl NodeApi for NodeClient {
    async fn info(&self) -> Result<NodeInfo, NodeError> {
        self.get_json("/info").await
    }

    async fn block_ids_at(&self, height: u64) -> Result<Vec<String>, NodeError> {
        self.get_json(&format!("/blocks/at/{height}")).await
    }

    async fn header(&self, block_id: &str) -> Result<WireHeader, NodeError> {
        if let Some(cache) = &self.header_cache {
            if let Some(header) = cache.get(block_id) {
                return Ok(header);
            }
        }
        let header: WireHeader = self.get_json(&format!("/blocks/{block_id}/header")).await?;
        if let Some(cache) = &self.header_cache {
            cache.put(block_id, header.clone());
        }
        Ok(header)
    }

    async fn block(&self, block_id: &str) -> Result<WireFullBlock, NodeError> {
        if let Some(cache) = &self.block_cache {
            if let Some(block) = cache.get(block_id) {
                return Ok(block);
            }
        }
        let block: WireFullBlock = self.get_json(&format!("/blocks/{block_id}")).await?;
        if let Some(cache) = &self.block_cache {
            cache.put(block_id, block.clone());
        }
        Ok(block)
    }

    async fn unconfirmed_transactions(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<WireTransaction>, NodeError> {
        self.get_json(&format!(
            "/transactions/unconfirmed?offset={offset}&limit={limit}"
        ))
        .await
    }
}
