//! RPC capability consumed by the tracer.
//!
//! Every worker in the dispatch pool wraps one [`ChainSource`]. The trait is
//! implemented by [`crate::rpc::RpcEndpoint`] for real nodes and by in-memory
//! doubles in tests.

use std::future::Future;

use alloy::primitives::{Address, B256};
use futures::stream::BoxStream;
use thiserror::Error;

use crate::types::{BlockContents, RawLog, ValueTx};

/// Failure of a single RPC call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The endpoint refused the request because of request quotas.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Any other transport or JSON-RPC failure.
    #[error("rpc request failed: {0}")]
    Transport(String),
    /// The node does not know this block yet.
    #[error("block {0} not found")]
    MissingBlock(u64),
    /// Opening a subscription failed.
    #[error("subscription failed: {0}")]
    Subscription(String),
}

impl SourceError {
    /// Classifies a raw error message from the transport layer.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if looks_rate_limited(&message) {
            Self::RateLimited(message)
        } else {
            Self::Transport(message)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// Providers phrase quota errors differently; these cover HTTP 429,
/// JSON-RPC -32005 and the usual "limit exceeded" / "too many requests" text.
fn looks_rate_limited(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("limit")
        || lower.contains("too many requests")
        || lower.contains("429")
        || lower.contains("-32005")
}

/// Range query for ERC-20 Transfer logs sent by one address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferQuery {
    pub contract: Address,
    pub sender: Address,
    pub from_block: u64,
    pub to_block: u64,
}

/// Remote ledger endpoint.
pub trait ChainSource: Send + Sync + 'static {
    /// Human-readable identifier used in logs.
    fn label(&self) -> &str;

    /// Chain id reported by the node.
    fn chain_id(&self) -> impl Future<Output = Result<u64, SourceError>> + Send;

    fn latest_block_number(&self) -> impl Future<Output = Result<u64, SourceError>> + Send;

    /// Block with full transaction bodies.
    fn block(&self, number: u64) -> impl Future<Output = Result<BlockContents, SourceError>> + Send;

    /// Transfer logs of `query.contract` whose sender topic is `query.sender`.
    fn transfer_logs(
        &self,
        query: &TransferQuery,
    ) -> impl Future<Output = Result<Vec<RawLog>, SourceError>> + Send;

    fn transaction(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Option<ValueTx>, SourceError>> + Send;

    /// Logs of a mined transaction's receipt; `None` when no receipt exists.
    fn receipt_logs(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Option<Vec<RawLog>>, SourceError>> + Send;

    /// Numbers of newly mined blocks.
    fn subscribe_blocks(
        &self,
    ) -> impl Future<Output = Result<BoxStream<'static, u64>, SourceError>> + Send;

    /// Newly emitted Transfer logs of one token contract.
    fn subscribe_transfer_logs(
        &self,
        contract: Address,
    ) -> impl Future<Output = Result<BoxStream<'static, RawLog>, SourceError>> + Send;

    /// Whether the node answers at all.
    fn is_reachable(&self) -> impl Future<Output = bool> + Send {
        async move { self.latest_block_number().await.is_ok() }
    }
}
