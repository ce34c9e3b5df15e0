//! Errors raised while executing fetch jobs.

use flowtrace_data::SourceError;
use thiserror::Error;

/// Failure of one fetch job. Every variant is recoverable: the job is requeued.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error(transparent)]
    Source(#[from] SourceError),
    /// A cache-consuming job ran before the cache-populating jobs for its
    /// window finished, and too many blocks are missing to fetch directly.
    #[error("cache not ready: {missing} blocks missing, direct fetch limit is {limit}")]
    CacheNotReady { missing: u64, limit: u64 },
}

impl JobError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Source(e) if e.is_rate_limited())
    }
}
