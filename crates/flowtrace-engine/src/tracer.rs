//! Session facade: endpoint setup, seed resolution, backfill and live handoff.

use std::sync::Arc;

use eyre::{eyre, WrapErr};
use flowtrace_data::alert::{AlertSink, NoopAlerts, WatchlistClient};
use flowtrace_data::lookup::find_seed_transfer;
use flowtrace_data::rpc::RpcEndpoint;
use flowtrace_data::{ChainSource, SeedTransfer};

use crate::config::TraceConfig;
use crate::dispatch::Dispatcher;
use crate::fetch::FetchStrategy;
use crate::ledger::ScanWindow;
use crate::live::LiveTracker;
use crate::state::TraceState;

/// One tracing session over a validated endpoint pool.
///
/// The first source is the primary: seed lookup and live subscriptions go
/// through it. Every source becomes one backfill worker.
pub struct Tracer<S: ChainSource> {
    config: TraceConfig,
    sources: Vec<Arc<S>>,
}

impl Tracer<RpcEndpoint> {
    /// Validates the configuration and every configured endpoint.
    ///
    /// # Errors
    /// Returns error if the configuration is incomplete or any endpoint fails
    /// validation; all endpoint failures are reported together.
    pub async fn connect(config: TraceConfig) -> eyre::Result<Self> {
        config.validate().wrap_err("invalid trace configuration")?;
        let endpoints =
            RpcEndpoint::connect_pool(&config.endpoints, config.chain_id, config.validation_timeout())
                .await
                .wrap_err("endpoint validation failed")?;
        Self::from_sources(config, endpoints.into_iter().map(Arc::new).collect())
    }
}

impl<S: ChainSource> Tracer<S> {
    /// Builds a session over already validated sources.
    ///
    /// # Errors
    /// Returns error if `sources` is empty.
    pub fn from_sources(config: TraceConfig, sources: Vec<Arc<S>>) -> eyre::Result<Self> {
        if sources.is_empty() {
            return Err(eyre!("at least one endpoint is required"));
        }
        Ok(Self { config, sources })
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn sources(&self) -> &[Arc<S>] {
        &self.sources
    }

    pub fn primary(&self) -> &Arc<S> {
        &self.sources[0]
    }

    /// Looks up the configured seed transaction on the primary endpoint.
    ///
    /// # Errors
    /// Returns error if no seed is configured or the transaction does not
    /// carry a qualifying transfer.
    pub async fn resolve_seed(&self) -> eyre::Result<SeedTransfer> {
        let hash = self
            .config
            .seed_tx
            .ok_or_else(|| eyre!("no seed transaction configured"))?;
        let seed = find_seed_transfer(self.primary().as_ref(), &self.config.token, hash)
            .await
            .wrap_err_with(|| format!("failed to resolve seed transaction {hash}"))?;
        tracing::info!(
            tx_hash = %seed.tx_hash,
            block_number = seed.block_number,
            amount = %self.config.token.format_amount(seed.amount),
            "seed transfer resolved"
        );
        Ok(seed)
    }

    /// Backfill window for `seed`: from the seed block to the configured
    /// "until" block, clamped at the chain head.
    ///
    /// # Errors
    /// Returns error if the head cannot be read or lies before the seed block.
    pub async fn scan_window(&self, seed: &SeedTransfer) -> eyre::Result<ScanWindow> {
        let latest = self
            .primary()
            .latest_block_number()
            .await
            .wrap_err("failed to read latest block number")?;
        let upper_bound = self.config.until_block.map_or(latest, |until| until.min(latest));
        if upper_bound < seed.block_number {
            return Err(eyre!(
                "until block {upper_bound} is before the seed block {}",
                seed.block_number
            ));
        }

        Ok(ScanWindow::new(
            seed.block_number,
            upper_bound,
            self.config.effective_cache_depth(),
            self.config.chunk_size(),
        ))
    }

    /// Resolves the seed and returns a dispatcher with its backfill queued.
    ///
    /// # Errors
    /// Returns error if the seed cannot be resolved or the window is empty.
    pub async fn backfill(&self) -> eyre::Result<Dispatcher<S>> {
        let seed = self.resolve_seed().await?;
        let window = self.scan_window(&seed).await?;
        tracing::info!(
            seed_block = window.seed_block,
            upper_bound = window.upper_bound,
            cache_boundary = window.cache_boundary(),
            chunk_size = window.chunk_size,
            "scan window"
        );

        let token = self.config.token.clone();
        let strategy = FetchStrategy::for_token(&token);
        let mut dispatcher = Dispatcher::new(
            self.sources.clone(),
            TraceState::new(token, window),
            strategy,
            self.config.timings,
        );
        dispatcher.seed(&seed);
        Ok(dispatcher)
    }

    /// Continues the session in live mode on the primary endpoint.
    pub fn live(&self, state: TraceState) -> LiveTracker<S> {
        LiveTracker::new(Arc::clone(self.primary()), state, self.alerts())
    }

    /// Alert sink for live tracking.
    pub fn alerts(&self) -> Arc<dyn AlertSink> {
        match &self.config.alert_url {
            Some(url) => Arc::new(WatchlistClient::new(url)),
            None => Arc::new(NoopAlerts),
        }
    }
}
