//! Fetch jobs.

use std::fmt;
use std::ops::RangeInclusive;

use alloy::primitives::Address;
use serde::Serialize;

/// Scan `address`'s outgoing activity in `start_block..=end_block`.
///
/// Immutable once created. A failed job is requeued verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Job {
    pub address: Address,
    pub start_block: u64,
    pub end_block: u64,
    /// Successful fetch results are also written to the range cache.
    pub populates_cache: bool,
}

impl Job {
    pub fn new(address: Address, start_block: u64, end_block: u64, populates_cache: bool) -> Self {
        debug_assert!(start_block <= end_block, "empty job range");
        Self {
            address,
            start_block,
            end_block,
            populates_cache,
        }
    }

    pub fn blocks(&self) -> RangeInclusive<u64> {
        self.start_block..=self.end_block
    }

    /// Number of blocks covered. Never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end_block - self.start_block + 1
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}-{}]{}",
            self.address,
            self.start_block,
            self.end_block,
            if self.populates_cache { " (cache)" } else { "" }
        )
    }
}

/// Splits `start..=end` into jobs of at most `chunk_size` blocks.
///
/// `populates` decides the cache flag from each chunk's end block.
pub(crate) fn chunk_range(
    address: Address,
    start: u64,
    end: u64,
    chunk_size: u64,
    populates: impl Fn(u64) -> bool,
) -> Vec<Job> {
    let chunk_size = chunk_size.max(1);
    let mut jobs = Vec::new();
    let mut from = start;
    while from <= end {
        let to = from.saturating_add(chunk_size - 1).min(end);
        jobs.push(Job::new(address, from, to, populates(to)));
        if to == u64::MAX {
            break;
        }
        from = to + 1;
    }
    jobs
}
