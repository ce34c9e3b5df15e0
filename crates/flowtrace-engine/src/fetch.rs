//! Job execution against one RPC endpoint.
//!
//! Native value is found by reading whole blocks; ERC-20 transfers by a single
//! log-filter query. Either way the result is a list of [`ObservedTransfer`]s
//! sent by the job's address.

use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use flowtrace_data::source::TransferQuery;
use flowtrace_data::token::{decode_transfer_log, Token, TokenKind};
use flowtrace_data::{BlockContents, ChainSource, RawLog};

use crate::error::JobError;
use crate::job::Job;

/// How jobs find outgoing transfers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Scan full block bodies for nonzero-value transactions.
    NativeValueScan,
    /// Query Transfer logs of one token contract.
    LogFilterScan { contract: Address },
}

impl FetchStrategy {
    pub fn for_token(token: &Token) -> Self {
        match token.kind {
            TokenKind::Native => Self::NativeValueScan,
            TokenKind::Erc20 { contract } => Self::LogFilterScan { contract },
        }
    }

    pub fn uses_cache(&self) -> bool {
        matches!(self, Self::NativeValueScan)
    }
}

/// A transfer seen on chain, before accounting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedTransfer {
    pub tx_hash: B256,
    pub block_number: u64,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// Nonzero-value transfers in `block`, optionally restricted to one sender.
///
/// Contract creations carry no recipient and are skipped.
pub fn transfers_in_block(block: &BlockContents, sender: Option<Address>) -> Vec<ObservedTransfer> {
    block
        .transactions
        .iter()
        .filter(|tx| !tx.value.is_zero())
        .filter(|tx| sender.map_or(true, |s| s == tx.from))
        .filter_map(|tx| {
            Some(ObservedTransfer {
                tx_hash: tx.hash,
                block_number: block.number,
                from: tx.from,
                to: tx.to?,
                value: tx.value,
            })
        })
        .collect()
}

/// Decodes a Transfer log. Pending logs and other events yield `None`.
pub fn transfer_from_log(log: &RawLog) -> Option<ObservedTransfer> {
    let decoded = decode_transfer_log(log)?;
    Some(ObservedTransfer {
        tx_hash: log.tx_hash?,
        block_number: log.block_number?,
        from: decoded.from,
        to: decoded.to,
        value: decoded.value,
    })
}

/// A job together with what the range cache already holds for it.
///
/// Built by the dispatcher when the job is assigned, so the fetch task never
/// touches shared state.
#[derive(Clone, Debug)]
pub struct FetchPlan {
    pub job: Job,
    /// One entry per block of the job, `None` where the cache missed.
    /// Empty for strategies that do not use the cache.
    pub cached: Vec<Option<Arc<BlockContents>>>,
    pub cache_boundary: u64,
    /// Largest number of cache misses a cache-consuming job may fetch itself.
    pub direct_fetch_limit: u64,
}

#[derive(Clone, Debug, Default)]
pub struct FetchOutput {
    pub transfers: Vec<ObservedTransfer>,
    /// Every block of the job in order; only filled for cache-populating jobs.
    pub blocks: Vec<Arc<BlockContents>>,
}

/// Runs one job.
///
/// # Errors
/// Returns [`JobError`] on any RPC failure, or [`JobError::CacheNotReady`] when a
/// cache-consuming job finds too much of its window missing.
pub async fn execute<S: ChainSource>(
    source: &S,
    strategy: FetchStrategy,
    plan: FetchPlan,
) -> Result<FetchOutput, JobError> {
    match strategy {
        FetchStrategy::NativeValueScan => native_scan(source, plan).await,
        FetchStrategy::LogFilterScan { contract } => log_scan(source, contract, &plan.job).await,
    }
}

async fn native_scan<S: ChainSource>(source: &S, plan: FetchPlan) -> Result<FetchOutput, JobError> {
    let job = plan.job;
    let mut cached = plan.cached;
    cached.resize(job.len() as usize, None);

    let missing: Vec<u64> = job
        .blocks()
        .zip(&cached)
        .filter(|(_, hit)| hit.is_none())
        .map(|(number, _)| number)
        .collect();

    // Jobs inside the cache window expect the cache-populating jobs to have
    // done the fetching; a few stragglers are fine, a cold window is not.
    let reads_cache = !job.populates_cache && job.start_block >= plan.cache_boundary;
    if reads_cache && missing.len() as u64 > plan.direct_fetch_limit {
        return Err(JobError::CacheNotReady {
            missing: missing.len() as u64,
            limit: plan.direct_fetch_limit,
        });
    }

    let fetched = futures::future::try_join_all(missing.iter().map(|n| source.block(*n))).await?;

    tracing::debug!(
        job = %job,
        cache_hits = cached.len() - missing.len(),
        fetched = fetched.len(),
        "blocks ready"
    );

    let mut fetched = fetched.into_iter().map(Arc::new);
    let blocks: Vec<Arc<BlockContents>> = cached
        .into_iter()
        .filter_map(|hit| hit.or_else(|| fetched.next()))
        .collect();

    let transfers = blocks
        .iter()
        .flat_map(|block| transfers_in_block(block, Some(job.address)))
        .collect();

    Ok(FetchOutput {
        transfers,
        blocks: if job.populates_cache { blocks } else { Vec::new() },
    })
}

async fn log_scan<S: ChainSource>(source: &S, contract: Address, job: &Job) -> Result<FetchOutput, JobError> {
    let query = TransferQuery {
        contract,
        sender: job.address,
        from_block: job.start_block,
        to_block: job.end_block,
    };
    let logs = source.transfer_logs(&query).await?;

    let transfers = logs
        .iter()
        .filter_map(|log| {
            let transfer = transfer_from_log(log);
            if transfer.is_none() {
                tracing::debug!(job = %job, tx_hash = ?log.tx_hash, "skipping undecodable log");
            }
            transfer
        })
        .filter(|t| t.from == job.address)
        .collect();

    Ok(FetchOutput {
        transfers,
        blocks: Vec::new(),
    })
}
