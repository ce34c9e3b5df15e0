//! Trace session configuration.

use std::time::Duration;

use alloy::primitives::B256;
use flowtrace_data::rpc::VALIDATION_TIMEOUT;
use flowtrace_data::token::{Token, TokenKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ethereum Sepolia.
pub const DEFAULT_CHAIN_ID: u64 = 11_155_111;

/// Blocks kept in the shared range cache for native scans.
pub const DEFAULT_CACHE_DEPTH: u64 = 300;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one RPC endpoint is required")]
    NoEndpoints,
    #[error("seed transaction hash is required")]
    MissingSeed,
    #[error("chunk size must be positive")]
    ZeroChunkSize,
    #[error("tick interval must be positive")]
    ZeroTick,
}

/// Dispatch loop timing.
///
/// The cooldown step is independent of the tick interval: a penalized worker
/// sits out `ceil(penalty / step)` ticks whatever the tick length is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerTimings {
    pub tick_ms: u64,
    pub cooldown_penalty_ms: u64,
    pub cooldown_step_ms: u64,
}

impl Default for SchedulerTimings {
    fn default() -> Self {
        Self {
            tick_ms: 1_100,
            cooldown_penalty_ms: 2_000,
            cooldown_step_ms: 1_000,
        }
    }
}

impl SchedulerTimings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn cooldown_penalty(&self) -> Duration {
        Duration::from_millis(self.cooldown_penalty_ms)
    }

    pub fn cooldown_step(&self) -> Duration {
        Duration::from_millis(self.cooldown_step_ms)
    }
}

/// Everything needed to run one trace session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// RPC endpoints, one worker each. The first one serves lookups and
    /// subscriptions and must be a WebSocket URL.
    pub endpoints: Vec<String>,
    pub chain_id: u64,
    pub token: Token,
    pub seed_tx: Option<B256>,
    /// Last block of the backfill. Defaults to, and is clamped at, the latest block.
    pub until_block: Option<u64>,
    pub cache_depth: u64,
    /// Blocks per job; the token's default when unset.
    pub chunk_size: Option<u64>,
    pub timings: SchedulerTimings,
    pub validation_timeout_ms: u64,
    /// Watchlist service root URL; alerts are disabled when unset.
    pub alert_url: Option<String>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            chain_id: DEFAULT_CHAIN_ID,
            token: Token::native(),
            seed_tx: None,
            until_block: None,
            cache_depth: DEFAULT_CACHE_DEPTH,
            chunk_size: None,
            timings: SchedulerTimings::default(),
            validation_timeout_ms: VALIDATION_TIMEOUT.as_millis() as u64,
            alert_url: None,
        }
    }
}

impl TraceConfig {
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
            .unwrap_or_else(|| self.token.default_chunk_size())
    }

    /// Only native scans read block bodies, so log-filter tokens never cache.
    pub fn effective_cache_depth(&self) -> u64 {
        match self.token.kind {
            TokenKind::Native => self.cache_depth,
            TokenKind::Erc20 { .. } => 0,
        }
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.iter().all(|e| e.trim().is_empty()) {
            return Err(ConfigError::NoEndpoints);
        }
        if self.seed_tx.is_none() {
            return Err(ConfigError::MissingSeed);
        }
        if self.chunk_size() == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.timings.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        Ok(())
    }
}
