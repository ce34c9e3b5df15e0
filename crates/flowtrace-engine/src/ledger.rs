//! Traversal ledger: per-address bookkeeping and job generation.
//!
//! The ledger is the single source of truth for which block ranges have been
//! scheduled for each address. Addresses are discovered in arbitrary order (B
//! may first be seen receiving at block 400 and later at block 200 through
//! another branch), so each address keeps the earliest block already
//! scheduled and only the gap in front of it is ever turned into new jobs.

use std::collections::HashMap;

use alloy::primitives::{Address, I256, U256};
use flowtrace_data::Transfer;

use crate::job::{chunk_range, Job};

/// Block range of the backfill and how jobs are cut from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanWindow {
    /// Block of the seed transfer; nothing earlier is scanned or cached.
    pub seed_block: u64,
    /// Last block of the backfill (inclusive).
    pub upper_bound: u64,
    pub cache_depth: u64,
    pub chunk_size: u64,
}

impl ScanWindow {
    pub fn new(seed_block: u64, upper_bound: u64, cache_depth: u64, chunk_size: u64) -> Self {
        Self {
            seed_block,
            upper_bound,
            cache_depth,
            chunk_size,
        }
    }

    /// `max(upper_bound - cache_depth + 1, seed_block)`.
    ///
    /// With a cache depth of zero this is `upper_bound + 1`, so no block is
    /// ever inside the window.
    pub fn cache_boundary(&self) -> u64 {
        (self.upper_bound + 1)
            .saturating_sub(self.cache_depth)
            .max(self.seed_block)
    }
}

/// Bookkeeping for one traced address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressRecord {
    /// Position in the graph projection once registered.
    pub graph_index: Option<usize>,
    /// Earliest block from which outgoing activity is scheduled. Never increases.
    pub earliest_scheduled_block: u64,
    /// Outgoing transfers, in the order they were found.
    pub transfers: Vec<Transfer>,
    /// Received minus forwarded, in the token's smallest unit.
    pub net_traced_balance: I256,
}

impl AddressRecord {
    fn new(earliest_scheduled_block: u64) -> Self {
        Self {
            graph_index: None,
            earliest_scheduled_block,
            transfers: Vec::new(),
            net_traced_balance: I256::ZERO,
        }
    }

    /// Still holds funds attributed to the trace.
    pub fn holds_traced_funds(&self) -> bool {
        self.net_traced_balance.is_positive()
    }
}

fn signed(amount: U256) -> I256 {
    I256::try_from(amount).unwrap_or(I256::MAX)
}

/// Address records keyed by address. `Address` compares raw bytes, so keys are
/// independent of hex letter case.
#[derive(Debug, Default)]
pub struct Ledger {
    records: HashMap<Address, AddressRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, address: &Address) -> Option<&AddressRecord> {
        self.records.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.records.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &AddressRecord)> {
        self.records.iter()
    }

    /// Creates a record without scheduling anything. Returns `false` if one exists.
    pub fn insert(&mut self, address: Address, earliest_scheduled_block: u64) -> bool {
        if self.records.contains_key(&address) {
            return false;
        }
        self.records
            .insert(address, AddressRecord::new(earliest_scheduled_block));
        true
    }

    /// Schedules `address` to be searched from block `start` and returns the new jobs.
    ///
    /// - unknown address: jobs for `start..=upper_bound`. With `populates_cache`
    ///   (seed backfill only) the range is chunked and every chunk ending inside
    ///   the cache window populates it. Otherwise the range is split at the
    ///   cache boundary.
    /// - known address, `start` at or after its frontier: nothing, already covered.
    /// - known address, `start` before its frontier: jobs for the gap only,
    ///   split at the cache boundary; the frontier moves back to `start`.
    pub fn request_scan(
        &mut self,
        address: Address,
        start: u64,
        populates_cache: bool,
        window: &ScanWindow,
    ) -> Vec<Job> {
        let boundary = window.cache_boundary();

        let (from, to) = match self.records.get_mut(&address) {
            None => {
                self.records.insert(address, AddressRecord::new(start));
                if populates_cache {
                    return chunk_range(address, start, window.upper_bound, window.chunk_size, |end| {
                        end >= boundary
                    });
                }
                (start, window.upper_bound)
            }
            Some(record) if start >= record.earliest_scheduled_block => return Vec::new(),
            Some(record) => {
                let previous = record.earliest_scheduled_block;
                record.earliest_scheduled_block = start;
                (start, (previous - 1).min(window.upper_bound))
            }
        };

        split_at_boundary(address, from, to, boundary, window.chunk_size)
    }

    /// Adds `amount` to an existing record's balance.
    pub fn credit(&mut self, address: &Address, amount: U256) -> bool {
        match self.records.get_mut(address) {
            Some(record) => {
                record.net_traced_balance = record.net_traced_balance.saturating_add(signed(amount));
                true
            }
            None => false,
        }
    }

    /// Subtracts `amount` from an existing record's balance.
    pub fn debit(&mut self, address: &Address, amount: U256) -> bool {
        match self.records.get_mut(address) {
            Some(record) => {
                record.net_traced_balance = record.net_traced_balance.saturating_sub(signed(amount));
                true
            }
            None => false,
        }
    }

    pub fn append_transfers(&mut self, address: &Address, transfers: impl IntoIterator<Item = Transfer>) {
        if let Some(record) = self.records.get_mut(address) {
            record.transfers.extend(transfers);
        }
    }

    pub fn set_graph_index(&mut self, address: &Address, index: usize) {
        if let Some(record) = self.records.get_mut(address) {
            record.graph_index = Some(index);
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Jobs for `from..=to`: chunked below the boundary, one job at or above it.
///
/// The single job above the boundary leans on the range cache, which other
/// jobs are filling for the same window.
fn split_at_boundary(address: Address, from: u64, to: u64, boundary: u64, chunk_size: u64) -> Vec<Job> {
    if from > to {
        return Vec::new();
    }

    let mut jobs = Vec::new();
    if from < boundary {
        jobs.extend(chunk_range(address, from, to.min(boundary - 1), chunk_size, |_| false));
    }
    let cached_from = from.max(boundary);
    if cached_from <= to {
        jobs.push(Job::new(address, cached_from, to, false));
    }
    jobs
}
