//! Integration tests for backfill scheduling: job generation, worker
//! dispatch, rate-limit backoff, cache readiness and session control.

mod common;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, I256, U256};
use common::*;
use flowtrace_data::token::Token;
use flowtrace_data::SeedTransfer;
use flowtrace_engine::config::SchedulerTimings;
use flowtrace_engine::dispatch::Completion;
use flowtrace_engine::{
    BackfillOutcome, Dispatcher, FetchStrategy, JobError, ScanWindow, TraceState,
};

const A: u8 = 0xa;
const B: u8 = 0xb;
const C: u8 = 0xc;
const D: u8 = 0xd;

fn seed() -> SeedTransfer {
    SeedTransfer {
        tx_hash: hash(0xa0),
        block_number: 100,
        timestamp: 1_700_001_200,
        from: addr(A),
        to: addr(B),
        amount: U256::from(10u64),
    }
}

fn native_dispatcher(
    chains: Vec<Arc<MockChain>>,
    window: ScanWindow,
    timings: SchedulerTimings,
) -> Dispatcher<MockChain> {
    Dispatcher::new(
        chains,
        TraceState::new(Token::native(), window),
        FetchStrategy::NativeValueScan,
        timings,
    )
}

fn queued(dispatcher: &Dispatcher<MockChain>) -> Vec<(Address, u64, u64, bool)> {
    dispatcher
        .queues()
        .iter()
        .map(|j| (j.address, j.start_block, j.end_block, j.populates_cache))
        .collect()
}

fn balance(dispatcher: &Dispatcher<MockChain>, n: u8) -> I256 {
    dispatcher
        .state()
        .ledger()
        .record(&addr(n))
        .map_or(I256::ZERO, |r| r.net_traced_balance)
}

fn signed(n: i64) -> I256 {
    I256::try_from(n).unwrap()
}

async fn next(dispatcher: &mut Dispatcher<MockChain>) -> Completion {
    tokio::time::timeout(Duration::from_secs(5), dispatcher.next_completion())
        .await
        .expect("no completion in time")
        .expect("completion channel closed")
}

/// Seed A→B at block 100, upper bound 110, chunk size 5, one worker. B's
/// backfill is three chunks; B→C at 106 adds a single cache-window job for C
/// and C→B at 108 adds nothing because B is already covered from 100.
#[tokio::test]
async fn backfill_schedules_each_range_once() {
    let chain = Arc::new(
        MockChain::new(120)
            .with_txs(106, vec![value_tx(1, 106, addr(B), addr(C), 4)])
            .with_txs(108, vec![value_tx(2, 108, addr(C), addr(B), 1)]),
    );
    let window = ScanWindow::new(100, 110, 5, 5);
    let mut dispatcher = native_dispatcher(vec![chain.clone()], window, fast_timings());

    dispatcher.seed(&seed());
    assert_eq!(
        queued(&dispatcher),
        vec![
            (addr(B), 100, 104, false),
            (addr(B), 105, 109, true),
            (addr(B), 110, 110, true),
        ]
    );

    drain(&mut dispatcher).await;

    let ledger = dispatcher.state().ledger();
    assert_eq!(ledger.len(), 3);
    assert_eq!(ledger.record(&addr(B)).unwrap().earliest_scheduled_block, 100);
    assert_eq!(ledger.record(&addr(C)).unwrap().earliest_scheduled_block, 106);
    // The seed sender is never scanned.
    assert_eq!(ledger.record(&addr(A)).unwrap().earliest_scheduled_block, 111);

    assert_eq!(balance(&dispatcher, A), I256::ZERO);
    assert_eq!(balance(&dispatcher, B), signed(7));
    assert_eq!(balance(&dispatcher, C), signed(3));

    // C's job is served entirely from the cache filled by B's backfill.
    let mut requests = chain.block_requests();
    requests.sort_unstable();
    assert_eq!(requests, (100..=110).collect::<Vec<_>>());

    let projection = dispatcher.state().projection();
    let order: Vec<Address> = projection.nodes().iter().map(|n| n.id).collect();
    assert_eq!(order, vec![addr(A), addr(B), addr(C)]);
    let blocks: Vec<u64> = projection.transfer_list().iter().map(|t| t.block_number).collect();
    assert_eq!(blocks, vec![100, 106, 108]);
    assert!(dispatcher.is_drained());
}

/// ERC-20 tracing runs with cache depth zero: one ungapped job per address
/// and nothing is ever cached.
#[tokio::test]
async fn token_mode_uses_single_jobs_without_cache() {
    let contract = addr(0xcc);
    let chain = Arc::new(
        MockChain::new(120)
            .with_log(transfer_log(contract, 1, 105, addr(B), addr(C), 6))
            .with_log(transfer_log(contract, 2, 107, addr(C), addr(D), 2))
            // Other contracts are ignored.
            .with_log(transfer_log(addr(0xee), 3, 106, addr(B), addr(0xf), 9)),
    );
    let token = Token::erc20("TKN", contract, 18);
    let window = ScanWindow::new(100, 110, 0, token.default_chunk_size());
    let mut dispatcher = Dispatcher::new(
        vec![chain.clone()],
        TraceState::new(token.clone(), window),
        FetchStrategy::for_token(&token),
        fast_timings(),
    );

    dispatcher.seed(&seed());
    assert_eq!(queued(&dispatcher), vec![(addr(B), 100, 110, false)]);

    drain(&mut dispatcher).await;

    assert_eq!(
        chain.log_queries(),
        vec![
            (addr(B), 100, 110),
            (addr(C), 105, 110),
            (addr(D), 107, 110),
        ]
    );
    assert!(chain.block_requests().is_empty());
    assert!(dispatcher.state().cache().is_empty());
    assert!(!dispatcher.state().ledger().contains(&addr(0xf)));
    assert_eq!(balance(&dispatcher, D), signed(2));
}

/// A rate-limited cache-populating job goes to the priority queue and the
/// worker sits out ticks until its cooldown has stepped down to zero.
#[tokio::test]
async fn rate_limited_cache_job_is_prioritized_after_cooldown() {
    let chain = Arc::new(MockChain::new(120).rate_limit_once(105));
    let window = ScanWindow::new(100, 110, 5, 5);
    let mut dispatcher =
        native_dispatcher(vec![chain.clone()], window, SchedulerTimings::default());
    dispatcher.seed(&seed());

    assert_eq!(dispatcher.assign(), 1);
    let completion = next(&mut dispatcher).await;
    dispatcher.complete(completion);

    assert_eq!(dispatcher.assign(), 1);
    let completion = next(&mut dispatcher).await;
    assert_eq!(completion.job.start_block, 105);
    assert!(matches!(&completion.result, Err(e) if e.is_rate_limited()));
    dispatcher.complete(completion);

    assert_eq!(dispatcher.queues().priority_len(), 1);
    assert_eq!(dispatcher.queues().normal_len(), 1);
    assert_eq!(dispatcher.workers()[0].cooldown(), Duration::from_millis(2000));

    // 2000ms penalty, 1000ms step: two idle ticks.
    assert_eq!(dispatcher.assign(), 0);
    assert_eq!(dispatcher.workers()[0].cooldown(), Duration::from_millis(1000));
    assert_eq!(dispatcher.assign(), 0);
    assert!(!dispatcher.workers()[0].is_cooling());

    assert_eq!(dispatcher.assign(), 1);
    let active = dispatcher.workers()[0].active_job().copied();
    assert_eq!(active.map(|j| (j.start_block, j.populates_cache)), Some((105, true)));

    let completion = next(&mut dispatcher).await;
    assert!(completion.result.is_ok());
    dispatcher.complete(completion);
    // Boundary is 106, so block 105 stays out of the cache.
    assert_eq!(dispatcher.state().cache().len(), 4);
}

/// Failures other than rate limits are requeued on the normal queue and the
/// worker stays available.
#[tokio::test]
async fn transient_failure_requeues_without_penalty() {
    // Blocks past 104 do not exist yet.
    let chain = Arc::new(MockChain::new(104));
    let window = ScanWindow::new(100, 106, 0, 5);
    let mut dispatcher = native_dispatcher(vec![chain], window, SchedulerTimings::default());
    dispatcher.seed(&seed());

    assert_eq!(dispatcher.assign(), 1);
    let completion = next(&mut dispatcher).await;
    dispatcher.complete(completion);

    assert_eq!(dispatcher.assign(), 1);
    let completion = next(&mut dispatcher).await;
    assert!(matches!(&completion.result, Err(e) if !e.is_rate_limited()));
    dispatcher.complete(completion);

    assert_eq!(queued(&dispatcher), vec![(addr(B), 105, 106, false)]);
    assert_eq!(dispatcher.queues().priority_len(), 0);
    assert!(!dispatcher.workers()[0].is_cooling());
    assert_eq!(dispatcher.assign(), 1);
}

/// Three workers, blocks 103-108 stalled. C is discovered below the cache
/// boundary; its cache-window job runs before the cache is warm, fails with
/// CacheNotReady, and succeeds from the cache once B's jobs land.
#[tokio::test]
async fn cache_consumer_waits_for_cache_population() {
    let chain = Arc::new(
        MockChain::new(120)
            .with_txs(101, vec![value_tx(1, 101, addr(B), addr(C), 5)])
            .with_txs(104, vec![value_tx(2, 104, addr(C), addr(D), 2)])
            .gate_blocks(103..=108),
    );
    let window = ScanWindow::new(100, 108, 6, 3);
    assert_eq!(window.cache_boundary(), 103);
    let mut dispatcher = native_dispatcher(vec![chain.clone(); 3], window, fast_timings());
    dispatcher.seed(&seed());
    assert_eq!(
        queued(&dispatcher),
        vec![
            (addr(B), 100, 102, false),
            (addr(B), 103, 105, true),
            (addr(B), 106, 108, true),
        ]
    );

    assert_eq!(dispatcher.assign(), 3);
    let completion = next(&mut dispatcher).await;
    assert_eq!(completion.worker, 0);
    dispatcher.complete(completion);
    assert_eq!(
        queued(&dispatcher),
        vec![(addr(C), 101, 102, false), (addr(C), 103, 108, false)]
    );

    // Below the boundary: fetched directly.
    assert_eq!(dispatcher.assign(), 1);
    let completion = next(&mut dispatcher).await;
    assert!(completion.result.is_ok());
    dispatcher.complete(completion);

    // Inside the window with six misses and a limit of three.
    assert_eq!(dispatcher.assign(), 1);
    let completion = next(&mut dispatcher).await;
    assert!(matches!(
        completion.result,
        Err(JobError::CacheNotReady { missing: 6, limit: 3 })
    ));
    dispatcher.complete(completion);
    assert_eq!(queued(&dispatcher), vec![(addr(C), 103, 108, false)]);
    assert!(!dispatcher.workers()[0].is_cooling());

    chain.release();
    for _ in 0..2 {
        let completion = next(&mut dispatcher).await;
        dispatcher.complete(completion);
    }
    assert_eq!(dispatcher.state().cache().len(), 6);

    // C's retry and then D's job are both served from the cache.
    while !dispatcher.is_drained() {
        dispatcher.assign();
        let completion = next(&mut dispatcher).await;
        assert!(completion.result.is_ok());
        dispatcher.complete(completion);
    }

    assert!(dispatcher.state().ledger().contains(&addr(D)));
    assert_eq!(balance(&dispatcher, C), signed(3));
    for n in 103..=108 {
        assert_eq!(chain.requests_for(n), 1, "block {n} fetched more than once");
    }
}

/// Terminating stops the backfill, drops pending jobs and discards results
/// that arrive afterwards.
#[tokio::test]
async fn termination_discards_in_flight_results() {
    let chain = Arc::new(
        MockChain::new(120)
            .with_txs(101, vec![value_tx(1, 101, addr(B), addr(C), 5)])
            .gate_blocks(100..=110),
    );
    let window = ScanWindow::new(100, 110, 5, 5);
    let mut dispatcher = native_dispatcher(vec![chain.clone()], window, fast_timings());
    dispatcher.seed(&seed());

    let outcome = dispatcher
        .run(tokio::time::sleep(Duration::from_millis(50)), |_| {})
        .await;
    assert!(matches!(
        outcome,
        BackfillOutcome::Cancelled { dropped_jobs: 2, .. }
    ));
    assert!(dispatcher.is_cancelled());
    assert!(dispatcher.queues().is_empty());
    assert!(dispatcher.workers().iter().all(|w| !w.is_busy()));

    chain.release();
    let completion = next(&mut dispatcher).await;
    assert!(completion.result.is_ok());
    dispatcher.complete(completion);

    assert!(!dispatcher.state().ledger().contains(&addr(C)));
    assert_eq!(dispatcher.assign(), 0);
}

/// Reset forgets the session; a stale completion from before the reset is
/// ignored and a fresh seed traces normally.
#[tokio::test]
async fn reset_starts_a_clean_session() {
    let chain = Arc::new(
        MockChain::new(120)
            .with_txs(101, vec![value_tx(1, 101, addr(B), addr(C), 5)])
            .gate_blocks([100]),
    );
    let window = ScanWindow::new(100, 110, 5, 5);
    let mut dispatcher = native_dispatcher(vec![chain.clone()], window, fast_timings());
    dispatcher.seed(&seed());
    assert_eq!(dispatcher.assign(), 1);

    dispatcher.reset();
    assert!(dispatcher.queues().is_empty());
    assert!(dispatcher.state().ledger().is_empty());
    assert!(dispatcher.state().projection().is_empty());
    assert!(dispatcher.state().seed_transfer().is_none());

    chain.release();
    let stale = next(&mut dispatcher).await;
    dispatcher.complete(stale);
    assert!(dispatcher.state().ledger().is_empty());

    dispatcher.seed(&seed());
    drain(&mut dispatcher).await;
    assert!(dispatcher.state().ledger().contains(&addr(C)));
    assert_eq!(balance(&dispatcher, C), signed(5));
}

/// Several workers drain a longer backfill and the stats reflect the
/// finished session.
#[tokio::test]
async fn worker_pool_drains_and_reports_stats() {
    let chain = Arc::new(
        MockChain::new(200)
            .with_txs(130, vec![value_tx(1, 130, addr(B), addr(C), 4)])
            .with_txs(185, vec![value_tx(2, 185, addr(C), addr(D), 1)]),
    );
    let window = ScanWindow::new(100, 199, 30, 13);
    let mut dispatcher = native_dispatcher(vec![chain.clone(); 4], window, fast_timings());
    dispatcher.seed(&seed());

    let mut ticks = 0;
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        dispatcher.run(std::future::pending(), |stats| {
            ticks += 1;
            assert!(stats.active <= 4);
        }),
    )
    .await
    .expect("backfill did not drain in time");
    assert!(matches!(outcome, BackfillOutcome::Drained { .. }));
    assert!(ticks > 0);

    let stats = dispatcher.stats();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.addresses, 4);
    assert_eq!(stats.transfers, 3);
    assert_eq!(stats.cached_blocks, 30);
    assert_eq!(balance(&dispatcher, D), signed(1));
}
