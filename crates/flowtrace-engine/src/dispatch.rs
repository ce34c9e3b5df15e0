//! Dispatch loop over the worker pool.
//!
//! The dispatcher is the single coordinator of a backfill. It owns the job
//! queues, the workers and the [`TraceState`]; fetches run as spawned tasks
//! that only report back over a channel, and completions are applied one at
//! a time, so ledger and cache never see concurrent writers.
//!
//! Every tick each idle worker is considered in index order: a cooling worker
//! steps its cooldown down and sits the tick out, any other worker takes the
//! next job (priority queue first). The backfill is drained once a tick ends
//! with both queues empty and no job in flight.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flowtrace_data::{ChainSource, SeedTransfer};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerTimings;
use crate::error::JobError;
use crate::fetch::{self, FetchOutput, FetchStrategy};
use crate::job::Job;
use crate::queue::JobQueues;
use crate::state::TraceState;
use crate::worker::Worker;

/// Result of one fetch task.
#[derive(Debug)]
pub struct Completion {
    pub worker: usize,
    /// Session generation the job was assigned in.
    pub epoch: u64,
    pub job: Job,
    pub result: Result<FetchOutput, JobError>,
}

/// How a backfill run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// Every job completed.
    Drained { elapsed: Duration },
    /// Stopped by the operator; pending jobs were dropped.
    Cancelled { elapsed: Duration, dropped_jobs: usize },
}

/// Snapshot reported after every tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub queued: usize,
    pub prioritized: usize,
    pub active: usize,
    pub cooling: usize,
    pub addresses: usize,
    pub transfers: usize,
    pub cached_blocks: usize,
}

enum Event {
    Tick,
    Completed(Completion),
    Shutdown,
}

#[derive(Debug)]
pub struct Dispatcher<S: ChainSource> {
    workers: Vec<Worker<S>>,
    queues: JobQueues,
    state: TraceState,
    strategy: FetchStrategy,
    timings: SchedulerTimings,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    cancelled: bool,
    epoch: u64,
    started: Instant,
}

impl<S: ChainSource> Dispatcher<S> {
    pub fn new(
        sources: Vec<Arc<S>>,
        state: TraceState,
        strategy: FetchStrategy,
        timings: SchedulerTimings,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let workers = sources
            .into_iter()
            .enumerate()
            .map(|(id, source)| Worker::new(id, source))
            .collect();

        Self {
            workers,
            queues: JobQueues::new(),
            state,
            strategy,
            timings,
            completions_tx,
            completions_rx,
            cancelled: false,
            epoch: 0,
            started: Instant::now(),
        }
    }

    /// Seeds the trace and queues the recipient's backfill.
    pub fn seed(&mut self, seed: &SeedTransfer) {
        let jobs = self.state.seed(seed);
        self.queues.extend(jobs);
    }

    pub fn state(&self) -> &TraceState {
        &self.state
    }

    /// Hands the session state over, e.g. to live tracking.
    pub fn into_state(self) -> TraceState {
        self.state
    }

    pub fn queues(&self) -> &JobQueues {
        &self.queues
    }

    pub fn workers(&self) -> &[Worker<S>] {
        &self.workers
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Both queues empty and nothing in flight.
    pub fn is_drained(&self) -> bool {
        self.queues.is_empty() && self.workers.iter().all(|w| !w.is_busy())
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            queued: self.queues.len(),
            prioritized: self.queues.priority_len(),
            active: self.workers.iter().filter(|w| w.is_busy()).count(),
            cooling: self.workers.iter().filter(|w| w.is_cooling()).count(),
            addresses: self.state.ledger().len(),
            transfers: self.state.projection().transfer_count(),
            cached_blocks: self.state.cache().len(),
        }
    }

    /// One assignment pass. Returns how many jobs were started.
    ///
    /// Must run inside a tokio runtime: each job is spawned as its own task.
    pub fn assign(&mut self) -> usize {
        if self.cancelled {
            return 0;
        }

        let mut started = 0;
        for worker in &mut self.workers {
            if worker.is_busy() {
                continue;
            }
            if worker.is_cooling() {
                let remaining = worker.cool_down(self.timings.cooldown_step());
                tracing::debug!(
                    worker = worker.id(),
                    remaining_ms = remaining.as_millis() as u64,
                    "worker cooling down"
                );
                continue;
            }
            let Some(job) = self.queues.pop() else {
                continue;
            };

            let plan = self.state.fetch_plan(job, self.strategy);
            worker.begin(job);
            tracing::debug!(worker = worker.id(), job = %job, "worker took job");

            let id = worker.id();
            let source = Arc::clone(worker.source());
            let strategy = self.strategy;
            let epoch = self.epoch;
            let tx = self.completions_tx.clone();
            tokio::spawn(async move {
                let result = fetch::execute(source.as_ref(), strategy, plan).await;
                // Receiver gone means the session ended; the result is moot.
                let _ = tx.send(Completion { worker: id, epoch, job, result });
            });
            started += 1;
        }
        started
    }

    /// Waits for the next fetch task to finish.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        self.completions_rx.recv().await
    }

    /// Applies a finished job: records transfers and queues follow-up jobs on
    /// success, requeues the job on failure.
    pub fn complete(&mut self, completion: Completion) {
        let Completion { worker: id, epoch, job, result } = completion;
        if self.cancelled || epoch != self.epoch {
            tracing::debug!(worker = id, job = %job, "discarding stale result");
            return;
        }
        let Some(worker) = self.workers.get_mut(id) else {
            tracing::error!(worker = id, "completion from unknown worker");
            return;
        };
        worker.finish();

        match result {
            Ok(output) => {
                let cached = self.state.cache_blocks(&job, output.blocks);
                let follow_up = self.state.apply_scan_result(&job, output.transfers);
                tracing::debug!(
                    worker = id,
                    job = %job,
                    cached,
                    follow_up = follow_up.len(),
                    "worker completed job"
                );
                self.queues.extend(follow_up);
            }
            Err(err) if err.is_rate_limited() => {
                worker.penalize(self.timings.cooldown_penalty());
                tracing::warn!(worker = id, job = %job, error = %err, "rate limited, cooling down");
                if job.populates_cache {
                    self.queues.push_priority(job);
                } else {
                    self.queues.push(job);
                }
            }
            Err(err) => {
                tracing::warn!(worker = id, job = %job, error = %err, "job failed, requeued");
                self.queues.push(job);
            }
        }
    }

    /// Stops the backfill: pending jobs are dropped and results still in
    /// flight will be discarded. Returns how many queued jobs were dropped.
    pub fn terminate(&mut self) -> usize {
        let dropped = self.queues.len();
        self.cancelled = true;
        self.queues.clear();
        for worker in &mut self.workers {
            worker.finish();
        }
        tracing::info!(dropped_jobs = dropped, "backfill terminated");
        dropped
    }

    /// Clears the session: queues, ledger, projection and cache. Results of
    /// jobs still in flight are discarded.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.cancelled = false;
        self.queues.clear();
        for worker in &mut self.workers {
            worker.finish();
        }
        self.state.reset();
        tracing::info!("session reset");
    }

    /// Ticks until the backlog drains or `shutdown` resolves.
    ///
    /// `on_tick` sees the dispatcher's stats after every assignment pass.
    pub async fn run<F, T>(&mut self, shutdown: F, mut on_tick: T) -> BackfillOutcome
    where
        F: Future<Output = ()>,
        T: FnMut(&DispatchStats),
    {
        self.started = Instant::now();
        let mut ticker = tokio::time::interval(self.timings.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            workers = self.workers.len(),
            queued = self.queues.len(),
            tick_ms = self.timings.tick_ms,
            "backfill started"
        );

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => Event::Shutdown,
                Some(completion) = self.completions_rx.recv() => Event::Completed(completion),
                _ = ticker.tick() => Event::Tick,
            };

            match event {
                Event::Completed(completion) => self.complete(completion),
                Event::Tick => {
                    self.assign();
                    on_tick(&self.stats());
                    if self.is_drained() {
                        let elapsed = self.started.elapsed();
                        tracing::info!(
                            elapsed_secs = elapsed.as_secs_f64(),
                            addresses = self.state.ledger().len(),
                            transfers = self.state.projection().transfer_count(),
                            "backfill drained"
                        );
                        return BackfillOutcome::Drained { elapsed };
                    }
                }
                Event::Shutdown => {
                    let dropped_jobs = self.terminate();
                    return BackfillOutcome::Cancelled {
                        elapsed: self.started.elapsed(),
                        dropped_jobs,
                    };
                }
            }
        }
    }
}
