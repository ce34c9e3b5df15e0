//! Session state shared by backfill and live tracking.
//!
//! Ledger, projection and range cache change together; this type is the only
//! place that mutates them, and it is owned by exactly one coordinator at a
//! time (the dispatcher during backfill, the live tracker afterwards).

use std::sync::Arc;

use alloy::primitives::Address;
use flowtrace_data::token::Token;
use flowtrace_data::{BlockContents, SeedTransfer, Transfer};

use crate::cache::RangeCache;
use crate::fetch::{FetchPlan, FetchStrategy, ObservedTransfer};
use crate::job::Job;
use crate::ledger::{Ledger, ScanWindow};
use crate::projection::GraphProjection;

#[derive(Debug)]
pub struct TraceState {
    token: Token,
    window: ScanWindow,
    ledger: Ledger,
    projection: GraphProjection,
    cache: RangeCache,
    seed: Option<SeedTransfer>,
}

impl TraceState {
    pub fn new(token: Token, window: ScanWindow) -> Self {
        Self {
            token,
            window,
            ledger: Ledger::new(),
            projection: GraphProjection::new(),
            cache: RangeCache::with_boundary(window.cache_boundary()),
            seed: None,
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn window(&self) -> &ScanWindow {
        &self.window
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn projection(&self) -> &GraphProjection {
        &self.projection
    }

    pub fn cache(&self) -> &RangeCache {
        &self.cache
    }

    pub fn seed_transfer(&self) -> Option<&SeedTransfer> {
        self.seed.as_ref()
    }

    /// Changes the backfill's last block; the cache boundary follows.
    pub fn set_upper_bound(&mut self, upper_bound: u64) {
        self.window.upper_bound = upper_bound;
        self.cache.set_boundary(self.window.cache_boundary());
    }

    /// Changes how many trailing blocks are cached; the cache boundary follows.
    pub fn set_cache_depth(&mut self, cache_depth: u64) {
        self.window.cache_depth = cache_depth;
        self.cache.set_boundary(self.window.cache_boundary());
    }

    pub fn transfer(&self, observed: &ObservedTransfer) -> Transfer {
        Transfer {
            tx_hash: observed.tx_hash,
            block_number: observed.block_number,
            from: observed.from,
            to: observed.to,
            amount: observed.value,
            formatted_amount: self.token.format_amount(observed.value),
        }
    }

    /// Starts the trace from `seed` and returns the recipient's backfill jobs.
    ///
    /// The sender is recorded but never scanned: its frontier sits past the
    /// upper bound and its balance is left at zero.
    pub fn seed(&mut self, seed: &SeedTransfer) -> Vec<Job> {
        self.seed = Some(seed.clone());
        let transfer = self.transfer(&ObservedTransfer {
            tx_hash: seed.tx_hash,
            block_number: seed.block_number,
            from: seed.from,
            to: seed.to,
            value: seed.amount,
        });

        self.ledger.insert(seed.from, self.window.upper_bound + 1);
        let jobs = self
            .ledger
            .request_scan(seed.to, seed.block_number, true, &self.window);
        self.ledger.credit(&seed.to, seed.amount);

        self.register_node(seed.from);
        self.register_node(seed.to);
        self.attach_transfers(seed.from, vec![transfer]);

        tracing::info!(
            from = %seed.from,
            to = %seed.to,
            block_number = seed.block_number,
            jobs = jobs.len(),
            "trace seeded"
        );
        jobs
    }

    /// What a job needs from the cache, captured at assignment time.
    pub fn fetch_plan(&self, job: Job, strategy: FetchStrategy) -> FetchPlan {
        let cached = if strategy.uses_cache() {
            job.blocks().map(|n| self.cache.get(n)).collect()
        } else {
            Vec::new()
        };
        FetchPlan {
            job,
            cached,
            cache_boundary: self.window.cache_boundary(),
            direct_fetch_limit: self.window.chunk_size,
        }
    }

    /// Stores blocks fetched by a cache-populating job.
    pub fn cache_blocks(&mut self, job: &Job, blocks: Vec<Arc<BlockContents>>) -> usize {
        if !job.populates_cache || blocks.is_empty() {
            return 0;
        }
        self.cache.put(job.start_block, blocks)
    }

    /// Applies the transfers a completed job found and returns follow-up jobs.
    ///
    /// Each recipient is scheduled from the transfer's block, balances move
    /// from sender to recipient, new recipients get graph nodes and the
    /// transfers are attached to the job's address.
    pub fn apply_scan_result(&mut self, job: &Job, found: Vec<ObservedTransfer>) -> Vec<Job> {
        let mut jobs = Vec::new();
        let mut discovered: Vec<Address> = Vec::new();
        let mut transfers = Vec::with_capacity(found.len());

        for observed in &found {
            jobs.extend(
                self.ledger
                    .request_scan(observed.to, observed.block_number, false, &self.window),
            );
            self.ledger.debit(&observed.from, observed.value);
            self.ledger.credit(&observed.to, observed.value);

            let unregistered = self
                .ledger
                .record(&observed.to)
                .is_some_and(|r| r.graph_index.is_none());
            if unregistered && !discovered.contains(&observed.to) {
                discovered.push(observed.to);
            }
            transfers.push(self.transfer(observed));
        }

        for address in &discovered {
            self.register_node(*address);
        }
        if !transfers.is_empty() {
            self.attach_transfers(job.address, transfers);
        }

        if !found.is_empty() {
            tracing::info!(
                job = %job,
                transfers = found.len(),
                new_addresses = discovered.len(),
                new_jobs = jobs.len(),
                "job found transfers"
            );
        }
        jobs
    }

    /// Applies a transfer seen while live tracking.
    ///
    /// Only senders still holding traced funds are followed. Returns the
    /// recorded transfer, or `None` when the transfer is ignored.
    pub fn apply_live_transfer(&mut self, observed: &ObservedTransfer) -> Option<Transfer> {
        if observed.value.is_zero() {
            return None;
        }
        let sender = self.ledger.record(&observed.from)?;
        if !sender.holds_traced_funds() {
            return None;
        }

        self.ledger.debit(&observed.from, observed.value);
        if self.ledger.insert(observed.to, 0) {
            tracing::info!(address = %observed.to, "discovered new address");
        }
        self.ledger.credit(&observed.to, observed.value);
        self.register_node(observed.to);

        let transfer = self.transfer(observed);
        self.attach_transfers(observed.from, vec![transfer.clone()]);
        Some(transfer)
    }

    /// Forgets everything about the session except token and window.
    pub fn reset(&mut self) {
        self.ledger.clear();
        self.projection.clear();
        self.cache.clear();
        self.cache.set_boundary(self.window.cache_boundary());
        self.seed = None;
    }

    fn register_node(&mut self, address: Address) {
        let unregistered = self
            .ledger
            .record(&address)
            .is_some_and(|r| r.graph_index.is_none());
        if unregistered {
            let index = self.projection.push_node(address);
            self.ledger.set_graph_index(&address, index);
        }
    }

    fn attach_transfers(&mut self, address: Address, transfers: Vec<Transfer>) {
        if let Some(index) = self.ledger.record(&address).and_then(|r| r.graph_index) {
            self.projection.extend_connections(index, transfers.iter().cloned());
        }
        self.ledger.append_transfers(&address, transfers);
    }
}
