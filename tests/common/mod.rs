//! Shared test helpers.
//!
//! [`MockChain`] is an in-memory ledger implementing [`ChainSource`]: any block
//! up to `latest` exists (empty unless given transactions), logs are served
//! from a flat list, and failures or stalls can be injected per block.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use flowtrace_data::source::TransferQuery;
use flowtrace_data::token::{address_to_topic, TRANSFER_TOPIC};
use flowtrace_data::{BlockContents, ChainSource, RawLog, SourceError, ValueTx};
use flowtrace_engine::config::SchedulerTimings;
use flowtrace_engine::{BackfillOutcome, Dispatcher};
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::Semaphore;

pub const CHAIN_ID: u64 = 11_155_111;

pub fn addr(n: u8) -> Address {
    Address::repeat_byte(n)
}

pub fn hash(n: u8) -> B256 {
    B256::repeat_byte(n)
}

pub fn value_tx(tx: u8, block_number: u64, from: Address, to: Address, value: u64) -> ValueTx {
    ValueTx {
        hash: hash(tx),
        block_number,
        from,
        to: Some(to),
        value: U256::from(value),
    }
}

/// An ERC-20 Transfer log as a node would return it.
pub fn transfer_log(
    contract: Address,
    tx: u8,
    block_number: u64,
    from: Address,
    to: Address,
    value: u64,
) -> RawLog {
    RawLog {
        address: contract,
        topics: vec![TRANSFER_TOPIC, address_to_topic(from), address_to_topic(to)],
        data: Bytes::from(U256::from(value).to_be_bytes::<32>().to_vec()),
        block_number: Some(block_number),
        tx_hash: Some(hash(tx)),
    }
}

/// Millisecond ticks so drained backfills finish quickly.
pub fn fast_timings() -> SchedulerTimings {
    SchedulerTimings {
        tick_ms: 5,
        cooldown_penalty_ms: 10,
        cooldown_step_ms: 5,
    }
}

/// Runs the dispatcher until it drains, failing the test after five seconds.
pub async fn drain<S: ChainSource>(dispatcher: &mut Dispatcher<S>) -> Duration {
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        dispatcher.run(std::future::pending(), |_| {}),
    )
    .await
    .expect("backfill did not drain in time");
    match outcome {
        BackfillOutcome::Drained { elapsed } => elapsed,
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[derive(Debug)]
pub struct MockChain {
    label: String,
    latest: u64,
    blocks: HashMap<u64, BlockContents>,
    logs: Vec<RawLog>,
    transactions: HashMap<B256, ValueTx>,
    receipts: HashMap<B256, Vec<RawLog>>,
    live_blocks: Vec<u64>,
    live_logs: Vec<RawLog>,
    /// Subscriptions stay open after the scripted items instead of ending.
    live_open: bool,
    /// Blocks whose next fetch fails with a rate limit.
    rate_limited: Mutex<HashSet<u64>>,
    /// Blocks whose fetch waits until [`MockChain::release`].
    gated: HashSet<u64>,
    gate: Arc<Semaphore>,
    block_requests: Mutex<Vec<u64>>,
    log_queries: Mutex<Vec<TransferQuery>>,
}

impl MockChain {
    pub fn new(latest: u64) -> Self {
        Self {
            label: "mock".to_string(),
            latest,
            blocks: HashMap::new(),
            logs: Vec::new(),
            transactions: HashMap::new(),
            receipts: HashMap::new(),
            live_blocks: Vec::new(),
            live_logs: Vec::new(),
            live_open: false,
            rate_limited: Mutex::new(HashSet::new()),
            gated: HashSet::new(),
            gate: Arc::new(Semaphore::new(0)),
            block_requests: Mutex::new(Vec::new()),
            log_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Adds transactions to block `number`; they also become retrievable by hash.
    pub fn with_txs(mut self, number: u64, txs: Vec<ValueTx>) -> Self {
        for tx in &txs {
            self.transactions.insert(tx.hash, tx.clone());
        }
        self.blocks
            .entry(number)
            .or_insert_with(|| empty_block(number))
            .transactions
            .extend(txs);
        self
    }

    pub fn with_log(mut self, log: RawLog) -> Self {
        if let Some(tx_hash) = log.tx_hash {
            self.receipts.entry(tx_hash).or_default().push(log.clone());
        }
        self.logs.push(log);
        self
    }

    pub fn with_receipt(mut self, tx_hash: B256, logs: Vec<RawLog>) -> Self {
        self.receipts.insert(tx_hash, logs);
        self
    }

    pub fn with_live_blocks(mut self, numbers: Vec<u64>) -> Self {
        self.live_blocks = numbers;
        self
    }

    pub fn with_live_logs(mut self, logs: Vec<RawLog>) -> Self {
        self.live_logs = logs;
        self
    }

    pub fn keep_subscriptions_open(mut self) -> Self {
        self.live_open = true;
        self
    }

    fn live_stream<T: Send + 'static>(&self, items: Vec<T>) -> BoxStream<'static, T> {
        let scripted = futures::stream::iter(items);
        if self.live_open {
            scripted.chain(futures::stream::pending()).boxed()
        } else {
            scripted.boxed()
        }
    }

    pub fn rate_limit_once(self, number: u64) -> Self {
        self.rate_limited.lock().unwrap().insert(number);
        self
    }

    pub fn gate_blocks(mut self, numbers: impl IntoIterator<Item = u64>) -> Self {
        self.gated.extend(numbers);
        self
    }

    /// Lets every gated fetch through.
    pub fn release(&self) {
        self.gate.add_permits(1 << 20);
    }

    pub fn block_requests(&self) -> Vec<u64> {
        self.block_requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, number: u64) -> usize {
        self.block_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|n| **n == number)
            .count()
    }

    pub fn log_queries(&self) -> Vec<(Address, u64, u64)> {
        self.log_queries
            .lock()
            .unwrap()
            .iter()
            .map(|q| (q.sender, q.from_block, q.to_block))
            .collect()
    }
}

fn empty_block(number: u64) -> BlockContents {
    BlockContents {
        number,
        timestamp: 1_700_000_000 + number * 12,
        transactions: Vec::new(),
    }
}

impl ChainSource for MockChain {
    fn label(&self) -> &str {
        &self.label
    }

    async fn chain_id(&self) -> Result<u64, SourceError> {
        Ok(CHAIN_ID)
    }

    async fn latest_block_number(&self) -> Result<u64, SourceError> {
        Ok(self.latest)
    }

    async fn block(&self, number: u64) -> Result<BlockContents, SourceError> {
        self.block_requests.lock().unwrap().push(number);
        if self.rate_limited.lock().unwrap().remove(&number) {
            return Err(SourceError::RateLimited(format!(
                "too many requests for block {number}"
            )));
        }
        if self.gated.contains(&number) {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| SourceError::Transport(e.to_string()))?;
        }
        if number > self.latest {
            return Err(SourceError::MissingBlock(number));
        }
        Ok(self
            .blocks
            .get(&number)
            .cloned()
            .unwrap_or_else(|| empty_block(number)))
    }

    async fn transfer_logs(&self, query: &TransferQuery) -> Result<Vec<RawLog>, SourceError> {
        self.log_queries.lock().unwrap().push(query.clone());
        let sender = address_to_topic(query.sender);
        Ok(self
            .logs
            .iter()
            .filter(|log| log.address == query.contract)
            .filter(|log| log.topics.get(1) == Some(&sender))
            .filter(|log| {
                log.block_number
                    .is_some_and(|n| (query.from_block..=query.to_block).contains(&n))
            })
            .cloned()
            .collect())
    }

    async fn transaction(&self, hash: B256) -> Result<Option<ValueTx>, SourceError> {
        Ok(self.transactions.get(&hash).cloned())
    }

    async fn receipt_logs(&self, hash: B256) -> Result<Option<Vec<RawLog>>, SourceError> {
        Ok(self.receipts.get(&hash).cloned())
    }

    async fn subscribe_blocks(&self) -> Result<BoxStream<'static, u64>, SourceError> {
        Ok(self.live_stream(self.live_blocks.clone()))
    }

    async fn subscribe_transfer_logs(
        &self,
        contract: Address,
    ) -> Result<BoxStream<'static, RawLog>, SourceError> {
        let logs: Vec<RawLog> = self
            .live_logs
            .iter()
            .filter(|log| log.address == contract)
            .cloned()
            .collect();
        Ok(self.live_stream(logs))
    }
}
