//! Seed transaction lookup.
//!
//! Resolves the transaction hash an operator submits into the single transfer
//! the trace starts from.

use alloy::primitives::B256;
use thiserror::Error;

use crate::source::{ChainSource, SourceError};
use crate::token::{decode_transfer_log, Token, TokenKind, TRANSFER_TOPIC};
use crate::types::SeedTransfer;

/// Why a submitted transaction cannot seed a trace. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("transaction {0} not found")]
    TransactionNotFound(B256),
    #[error("transaction {0} is still pending")]
    Pending(B256),
    #[error("transaction {0} carries no native value transfer")]
    ZeroValue(B256),
    #[error("transaction {0} creates a contract and has no recipient")]
    NoRecipient(B256),
    #[error("receipt for transaction {0} not found")]
    ReceiptNotFound(B256),
    #[error("no logs found in transaction {0}")]
    NoLogs(B256),
    #[error("no ERC-20 Transfer event for {symbol} found in transaction {hash}")]
    NoQualifyingTransferEvent { hash: B256, symbol: String },
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Finds the transfer of `token` made by transaction `hash`.
///
/// Native tokens read the transaction itself and require nonzero value.
/// ERC-20 tokens read the receipt and take the first Transfer event emitted by
/// the token contract.
///
/// # Errors
/// Returns [`LookupError`] when the transaction does not qualify or an RPC call fails.
#[tracing::instrument(skip(source, token), fields(endpoint = source.label(), token = %token.symbol))]
pub async fn find_seed_transfer<S: ChainSource>(
    source: &S,
    token: &Token,
    hash: B256,
) -> Result<SeedTransfer, LookupError> {
    let (block_number, from, to, amount) = match token.kind {
        TokenKind::Native => {
            let tx = source
                .transaction(hash)
                .await?
                .ok_or(LookupError::TransactionNotFound(hash))?;
            if tx.value.is_zero() {
                return Err(LookupError::ZeroValue(hash));
            }
            if tx.block_number == 0 {
                return Err(LookupError::Pending(hash));
            }
            let to = tx.to.ok_or(LookupError::NoRecipient(hash))?;
            (tx.block_number, tx.from, to, tx.value)
        }
        TokenKind::Erc20 { contract } => {
            let logs = source
                .receipt_logs(hash)
                .await?
                .ok_or(LookupError::ReceiptNotFound(hash))?;
            if logs.is_empty() {
                return Err(LookupError::NoLogs(hash));
            }

            let (log, transfer) = logs
                .iter()
                .filter(|log| log.address == contract && log.topics.first() == Some(&TRANSFER_TOPIC))
                .find_map(|log| decode_transfer_log(log).map(|t| (log, t)))
                .ok_or_else(|| LookupError::NoQualifyingTransferEvent {
                    hash,
                    symbol: token.symbol.clone(),
                })?;

            let block_number = log.block_number.ok_or(LookupError::Pending(hash))?;
            (block_number, transfer.from, transfer.to, transfer.value)
        }
    };

    let timestamp = source.block(block_number).await?.timestamp;

    tracing::info!(
        block_number,
        from = %from,
        to = %to,
        amount = %amount,
        "seed transfer resolved"
    );

    Ok(SeedTransfer {
        tx_hash: hash,
        block_number,
        timestamp,
        from,
        to,
        amount,
    })
}
