//! Error types for the indexing pipeline.

use thiserror::Error;

/// Errors surfaced by the node HTTP client.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Transient failures exhausted all retries — connection refused,
    /// timeouts, 5xx responses.
    #[error("node unavailable after {attempts} attempts: {reason}")]
    Unavailable { attempts: u32, reason: String },

    /// The node returned 404, or an empty result where one was expected.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other 4xx — the request itself is wrong, retrying won't help.
    #[error("bad request ({status}): {reason}")]
    BadRequest { status: u16, reason: String },

    /// The response body could not be decoded into the expected shape.
    #[error("invalid response from node: {0}")]
    InvalidResponse(String),
}

impl NodeError {
    /// Returns `true` if the error is a tip race (height not served yet).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if the node is down and the caller should back off.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Errors surfaced by the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transaction failure, deadlock, statement error.
    #[error("store error: {0}")]
    Backend(String),

    /// A constraint was violated — e.g. a balance would go negative.
    /// Not retryable; the batch itself is wrong.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The connection to the store was lost.
    #[error("store connection lost: {0}")]
    Connection(String),
}

impl StoreError {
    /// Returns `true` if retrying the same operation can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Connection(_))
    }
}

/// Errors that reach the controller. The controller is the only component
/// allowed to halt the pipeline.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The block cannot be parsed or projected, even on retry.
    #[error("bad block at height {height}: {reason}")]
    BadBlock { height: u64, reason: String },

    /// The fork point is deeper than `max_reorg_depth` below the stored tip.
    #[error("reorg deeper than {max_depth} blocks below stored tip {tip_height}")]
    ReorgTooDeep { tip_height: u64, max_depth: u64 },

    /// Walkback ran out of stored history without finding a common ancestor —
    /// the stored prefix does not belong to the node's chain.
    #[error("stored lineage exhausted at height {height} during reorg walkback")]
    LineageExhausted { height: u64 },

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Shutdown signal received; no state was changed.
    #[error("cancelled")]
    Cancelled,
}

impl IndexError {
    /// Returns `true` if the pipeline must halt and wait for an operator.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BadBlock { .. } | Self::ReorgTooDeep { .. } | Self::LineageExhausted { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Helper for parser rejections.
    pub fn bad_block(height: u64, reason: impl Into<String>) -> Self {
        Self::BadBlock {
            height,
            reason: reason.into(),
        }
    }
}
