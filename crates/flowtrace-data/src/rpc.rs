//! Alloy RPC provider integration.
//!
//! Wraps one node endpoint (HTTP or WebSocket) behind [`ChainSource`] and maps
//! alloy RPC types to flowtrace-data schema types.

use std::time::Duration;

use alloy::network::TransactionResponse as _;
use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::eth::{BlockNumberOrTag, Filter, Log, Transaction};
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;

use crate::source::{ChainSource, SourceError, TransferQuery};
use crate::token::{address_to_topic, TRANSFER_TOPIC};
use crate::types::{BlockContents, RawLog, ValueTx};

/// Default limit for connecting to and validating one endpoint.
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Endpoint setup failure. Fatal: no partially validated pool is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("no RPC endpoints configured")]
    NoEndpoints,
    #[error("invalid RPC URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("first endpoint must be a ws:// or wss:// URL to support subscriptions, got {url}")]
    SubscriptionsUnsupported { url: String },
    #[error("endpoint {url} is unreachable: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("endpoint {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("endpoint {url} is on chain {actual}, expected {expected}")]
    WrongNetwork { url: String, expected: u64, actual: u64 },
    #[error("failed to connect to node(s):\n{}", join_messages(.0))]
    Pool(Vec<SetupError>),
}

fn join_messages(errors: &[SetupError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_ws_url(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}

/// One validated node endpoint.
#[derive(Clone)]
pub struct RpcEndpoint {
    url: String,
    provider: DynProvider,
}

impl std::fmt::Debug for RpcEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcEndpoint").field("url", &self.url).finish()
    }
}

impl RpcEndpoint {
    /// Connects to `url` and checks it serves `expected_chain_id`, all within `timeout`.
    ///
    /// # Errors
    /// Returns [`SetupError`] if the URL is malformed, the node does not answer in
    /// time, or it reports a different chain id.
    #[tracing::instrument(skip_all, fields(url = %url))]
    pub async fn connect(
        url: &str,
        expected_chain_id: u64,
        timeout: Duration,
    ) -> Result<Self, SetupError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SetupError::InvalidUrl {
                url: url.to_string(),
                reason: "empty endpoint".to_string(),
            });
        }

        let attempt = async {
            let provider = ProviderBuilder::new()
                .on_builtin(url)
                .await
                .map_err(|e| SetupError::Unreachable {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?
                .erased();

            let actual = provider
                .get_chain_id()
                .await
                .map_err(|e| SetupError::Unreachable {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

            Ok::<_, SetupError>((provider, actual))
        };

        let (provider, actual) = tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| SetupError::Timeout {
                url: url.to_string(),
                timeout,
            })??;

        if actual != expected_chain_id {
            return Err(SetupError::WrongNetwork {
                url: url.to_string(),
                expected: expected_chain_id,
                actual,
            });
        }

        tracing::info!(url = %url, chain_id = actual, "RPC connection successful");

        Ok(Self {
            url: url.to_string(),
            provider,
        })
    }

    /// Validates every endpoint in order.
    ///
    /// The first endpoint must speak WebSocket because live tracking subscribes
    /// through it. All failures are collected (deduplicated) and returned together.
    pub async fn connect_pool(
        urls: &[String],
        expected_chain_id: u64,
        timeout: Duration,
    ) -> Result<Vec<Self>, SetupError> {
        let first = urls.first().ok_or(SetupError::NoEndpoints)?;
        if !is_ws_url(first.trim()) {
            return Err(SetupError::SubscriptionsUnsupported { url: first.clone() });
        }

        let mut endpoints = Vec::with_capacity(urls.len());
        let mut failures: Vec<SetupError> = Vec::new();
        for url in urls {
            match Self::connect(url, expected_chain_id, timeout).await {
                Ok(endpoint) => endpoints.push(endpoint),
                Err(err) => {
                    tracing::warn!(url = %url, error = %err, "endpoint validation failed");
                    if !failures.contains(&err) {
                        failures.push(err);
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(endpoints)
        } else {
            Err(SetupError::Pool(failures))
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn map_err(err: impl std::fmt::Display) -> SourceError {
    SourceError::from_message(err.to_string())
}

fn map_tx(tx: &Transaction, fallback_block: u64) -> ValueTx {
    ValueTx {
        hash: tx.tx_hash(),
        block_number: tx.block_number.unwrap_or(fallback_block),
        from: tx.from(),
        to: alloy::consensus::Transaction::to(tx),
        value: alloy::consensus::Transaction::value(tx),
    }
}

fn map_log(log: &Log) -> RawLog {
    RawLog {
        address: log.inner.address,
        topics: log.inner.data.topics().to_vec(),
        data: log.inner.data.data.clone(),
        block_number: log.block_number,
        tx_hash: log.transaction_hash,
    }
}

impl ChainSource for RpcEndpoint {
    fn label(&self) -> &str {
        &self.url
    }

    async fn chain_id(&self) -> Result<u64, SourceError> {
        self.provider.get_chain_id().await.map_err(map_err)
    }

    async fn latest_block_number(&self) -> Result<u64, SourceError> {
        self.provider.get_block_number().await.map_err(map_err)
    }

    #[tracing::instrument(skip(self), fields(endpoint = %self.url))]
    async fn block(&self, number: u64) -> Result<BlockContents, SourceError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .full()
            .await
            .map_err(map_err)?
            .ok_or(SourceError::MissingBlock(number))?;

        let transactions = block
            .transactions
            .txns()
            .map(|tx| map_tx(tx, number))
            .collect();

        Ok(BlockContents {
            number: block.header.number,
            timestamp: block.header.timestamp,
            transactions,
        })
    }

    async fn transfer_logs(&self, query: &TransferQuery) -> Result<Vec<RawLog>, SourceError> {
        let filter = Filter::new()
            .address(query.contract)
            .event_signature(TRANSFER_TOPIC)
            .topic1(address_to_topic(query.sender))
            .from_block(query.from_block)
            .to_block(query.to_block);

        let logs = self.provider.get_logs(&filter).await.map_err(map_err)?;
        Ok(logs.iter().map(map_log).collect())
    }

    async fn transaction(&self, hash: B256) -> Result<Option<ValueTx>, SourceError> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(map_err)?;
        Ok(tx.map(|tx| map_tx(&tx, 0)))
    }

    async fn receipt_logs(&self, hash: B256) -> Result<Option<Vec<RawLog>>, SourceError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(map_err)?;
        Ok(receipt.map(|receipt| receipt.inner.logs().iter().map(map_log).collect()))
    }

    async fn subscribe_blocks(&self) -> Result<BoxStream<'static, u64>, SourceError> {
        let subscription = self
            .provider
            .subscribe_blocks()
            .await
            .map_err(|e| SourceError::Subscription(e.to_string()))?;
        Ok(subscription
            .into_stream()
            .map(|header| header.number)
            .boxed())
    }

    async fn subscribe_transfer_logs(
        &self,
        contract: Address,
    ) -> Result<BoxStream<'static, RawLog>, SourceError> {
        let filter = Filter::new()
            .address(contract)
            .event_signature(TRANSFER_TOPIC);
        let subscription = self
            .provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| SourceError::Subscription(e.to_string()))?;
        Ok(subscription.into_stream().map(|log| map_log(&log)).boxed())
    }
}
