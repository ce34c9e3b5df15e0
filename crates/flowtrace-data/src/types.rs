//! Type definitions for chain data consumed by the tracer.
//!
//! These mirror the subset of alloy RPC types the traversal needs, so the
//! engine never depends on the shape of a particular provider response.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// A transaction as seen inside a fetched block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueTx {
    /// Transaction hash.
    pub hash: B256,
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Sender address.
    pub from: Address,
    /// Recipient address (None for contract creation).
    pub to: Option<Address>,
    /// Native value transferred, in wei.
    pub value: U256,
}

/// Full contents of a block: header fields plus every transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContents {
    /// Block number.
    pub number: u64,
    /// Timestamp in unix seconds.
    pub timestamp: u64,
    /// Transactions in block order.
    pub transactions: Vec<ValueTx>,
}

/// Event log entry as returned by a log filter, a receipt or a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    /// Contract that emitted the log.
    pub address: Address,
    /// Indexed topics, topic0 first.
    pub topics: Vec<B256>,
    /// Non-indexed data.
    pub data: Bytes,
    /// Block containing the log (None while pending).
    pub block_number: Option<u64>,
    /// Transaction that emitted the log (None while pending).
    pub tx_hash: Option<B256>,
}

/// One traced movement of funds, attached to the sender's record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub tx_hash: B256,
    pub block_number: u64,
    pub from: Address,
    pub to: Address,
    /// Raw amount in the token's smallest unit.
    pub amount: U256,
    /// Human-readable amount with token symbol, e.g. `0.25000 ETH`.
    pub formatted_amount: String,
}

/// The transfer a trace starts from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedTransfer {
    pub tx_hash: B256,
    pub block_number: u64,
    /// Timestamp of the containing block in unix seconds.
    pub timestamp: u64,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}
