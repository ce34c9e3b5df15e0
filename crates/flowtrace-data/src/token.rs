//! Token metadata, ERC-20 Transfer log decoding and amount formatting.

use alloy::primitives::utils::format_units;
use alloy::primitives::{address, b256, Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::types::RawLog;

/// ERC-20 Transfer event signature: `keccak256("Transfer(address,address,uint256)")`.
pub const TRANSFER_TOPIC: B256 =
    b256!("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// USTT test token on Sepolia.
pub const USTT_CONTRACT: Address = address!("0x349920b4d3ca271aa88988da0246c029a15671ea");

/// Fractional digits kept in formatted amounts.
pub const DISPLAY_DECIMALS: usize = 5;

/// How a token moves on chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenKind {
    /// Native currency carried in transaction value.
    Native,
    /// ERC-20 token emitting Transfer events.
    Erc20 { contract: Address },
}

/// A traceable token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub decimals: u8,
    pub kind: TokenKind,
}

impl Token {
    pub fn native() -> Self {
        Self {
            symbol: "ETH".to_string(),
            decimals: 18,
            kind: TokenKind::Native,
        }
    }

    pub fn erc20(symbol: impl Into<String>, contract: Address, decimals: u8) -> Self {
        Self {
            symbol: symbol.into(),
            decimals,
            kind: TokenKind::Erc20 { contract },
        }
    }

    /// Looks up a built-in token by symbol (case-insensitive).
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.to_ascii_uppercase().as_str() {
            "ETH" => Some(Self::native()),
            "USTT" => Some(Self::erc20("USTT", USTT_CONTRACT, 18)),
            _ => None,
        }
    }

    pub fn contract(&self) -> Option<Address> {
        match self.kind {
            TokenKind::Native => None,
            TokenKind::Erc20 { contract } => Some(contract),
        }
    }

    /// Default number of blocks per fetch job.
    ///
    /// Native scans pull every block body, log scans are a single filter query.
    pub fn default_chunk_size(&self) -> u64 {
        match self.kind {
            TokenKind::Native => 13,
            TokenKind::Erc20 { .. } => 400,
        }
    }

    /// Formats a raw amount as `<units> <symbol>`, truncated to [`DISPLAY_DECIMALS`].
    pub fn format_amount(&self, amount: U256) -> String {
        format!("{} {}", self.units(amount, Some(DISPLAY_DECIMALS)), self.symbol)
    }

    /// Raw amount expressed in whole token units, optionally truncated.
    pub fn units(&self, amount: U256, max_decimals: Option<usize>) -> String {
        let full = format_units(amount, self.decimals).unwrap_or_else(|_| amount.to_string());
        match max_decimals {
            Some(dp) => trim_decimals(&full, dp),
            None => full,
        }
    }
}

/// Truncates (never rounds) the fractional part of a decimal string.
pub fn trim_decimals(value: &str, dp: usize) -> String {
    match value.split_once('.') {
        Some((whole, frac)) => {
            let kept = &frac[..frac.len().min(dp)];
            if kept.is_empty() {
                whole.to_string()
            } else {
                format!("{whole}.{kept}")
            }
        }
        None => value.to_string(),
    }
}

/// Left-pads an address into a 32-byte topic.
pub fn address_to_topic(address: Address) -> B256 {
    address.into_word()
}

/// A decoded ERC-20 Transfer event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// Decodes a [`RawLog`] if it is an ERC-20 Transfer event.
///
/// Returns `None` for other events or logs with missing indexed topics.
pub fn decode_transfer_log(log: &RawLog) -> Option<DecodedTransfer> {
    if log.topics.first() != Some(&TRANSFER_TOPIC) || log.topics.len() < 3 {
        return None;
    }

    // Addresses are right-aligned in 32-byte topics.
    let from = Address::from_slice(&log.topics[1][12..]);
    let to = Address::from_slice(&log.topics[2][12..]);

    let data = &log.data[..log.data.len().min(32)];
    let value = if data.is_empty() {
        U256::ZERO
    } else {
        U256::from_be_slice(data)
    };

    Some(DecodedTransfer {
        token: log.address,
        from,
        to,
        value,
    })
}
