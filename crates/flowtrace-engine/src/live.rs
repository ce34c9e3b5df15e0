//! Real-time tracking after the backfill.
//!
//! Follows new blocks (native value) or new Transfer logs (ERC-20) on the
//! primary endpoint and applies the same accounting as the backfill, but only
//! for senders that still hold traced funds. No queues and no cache.

use std::future::Future;
use std::sync::Arc;

use flowtrace_data::alert::{AlertSink, AlertSummary};
use flowtrace_data::{ChainSource, RawLog, SourceError, Transfer};
use futures::stream::{BoxStream, StreamExt};

use crate::fetch::{transfer_from_log, transfers_in_block, FetchStrategy, ObservedTransfer};
use crate::state::TraceState;

enum LiveEvent {
    Block(u64),
    Log(RawLog),
}

pub struct LiveTracker<S: ChainSource> {
    source: Arc<S>,
    state: TraceState,
    strategy: FetchStrategy,
    alerts: Arc<dyn AlertSink>,
}

impl<S: ChainSource> LiveTracker<S> {
    pub fn new(source: Arc<S>, state: TraceState, alerts: Arc<dyn AlertSink>) -> Self {
        let strategy = FetchStrategy::for_token(state.token());
        Self {
            source,
            state,
            strategy,
            alerts,
        }
    }

    pub fn state(&self) -> &TraceState {
        &self.state
    }

    pub fn into_state(self) -> TraceState {
        self.state
    }

    /// Applies observed transfers and alerts on every new recipient edge.
    /// Returns the transfers that were recorded.
    pub fn handle_transfers(&mut self, observed: &[ObservedTransfer]) -> Vec<Transfer> {
        let mut recorded = Vec::new();
        for transfer in observed {
            let Some(transfer) = self.state.apply_live_transfer(transfer) else {
                continue;
            };
            tracing::info!(
                from = %transfer.from,
                to = %transfer.to,
                block_number = transfer.block_number,
                amount = %transfer.formatted_amount,
                "live transfer"
            );

            let token = self.state.token();
            let amount = format!("{} {}", token.units(transfer.amount, None), token.symbol);
            self.alerts
                .notify(transfer.to, AlertSummary::from_transfer(&transfer, amount));
            recorded.push(transfer);
        }
        recorded
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, LiveEvent>, SourceError> {
        Ok(match self.strategy {
            FetchStrategy::NativeValueScan => {
                self.source.subscribe_blocks().await?.map(LiveEvent::Block).boxed()
            }
            FetchStrategy::LogFilterScan { contract } => self
                .source
                .subscribe_transfer_logs(contract)
                .await?
                .map(LiveEvent::Log)
                .boxed(),
        })
    }

    async fn observe(&self, event: LiveEvent) -> Vec<ObservedTransfer> {
        match event {
            LiveEvent::Block(number) => match self.source.block(number).await {
                Ok(block) => transfers_in_block(&block, None),
                Err(e) => {
                    tracing::warn!(block_number = number, error = %e, "failed to fetch live block");
                    Vec::new()
                }
            },
            LiveEvent::Log(log) => transfer_from_log(&log).into_iter().collect(),
        }
    }

    /// Tracks until `shutdown` resolves or the subscription ends. Returns how
    /// many transfers were recorded.
    ///
    /// # Errors
    /// Returns error if the subscription cannot be opened.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<usize, SourceError>
    where
        F: Future<Output = ()>,
    {
        let mut events = self.subscribe().await?;
        tokio::pin!(shutdown);
        tracing::info!(
            endpoint = self.source.label(),
            token = %self.state.token().symbol,
            addresses = self.state.ledger().len(),
            "live tracking started"
        );

        let mut recorded = 0;
        loop {
            let next = tokio::select! {
                _ = &mut shutdown => None,
                event = events.next() => Some(event),
            };
            let event = match next {
                None => {
                    tracing::info!(recorded, "live tracking stopped");
                    break;
                }
                Some(None) => {
                    tracing::warn!(recorded, "live subscription ended");
                    break;
                }
                Some(Some(event)) => event,
            };

            // A block fetch still pending at shutdown is dropped unapplied.
            let observed = tokio::select! {
                _ = &mut shutdown => None,
                observed = self.observe(event) => Some(observed),
            };
            let Some(observed) = observed else {
                tracing::info!(recorded, "live tracking stopped with a fetch in flight");
                break;
            };
            recorded += self.handle_transfers(&observed).len();
        }
        Ok(recorded)
    }
}
