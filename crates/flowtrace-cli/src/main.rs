use std::io::{BufRead, IsTerminal, Write};
use std::time::Duration;

use alloy::primitives::{Address, B256};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{eyre, Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use flowtrace_data::rpc::RpcEndpoint;
use flowtrace_data::token::Token;
use flowtrace_data::{ChainSource, SeedTransfer};
use flowtrace_engine::config::{DEFAULT_CACHE_DEPTH, DEFAULT_CHAIN_ID};
use flowtrace_engine::{BackfillOutcome, DispatchStats, TraceConfig, TraceState, Tracer};
use indicatif::{ProgressBar, ProgressStyle};
use petgraph::dot::Dot;
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

const RPC_URLS_ENV: &str = "FLOWTRACE_RPC_URLS";
const ALERT_URL_ENV: &str = "FLOWTRACE_ALERT_URL";

#[derive(Parser, Debug)]
#[command(name = "flowtrace")]
#[command(about = "Trace the downstream flow of funds from a seed transaction")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// RPC endpoints; the first must be ws:// or wss://. Falls back to FLOWTRACE_RPC_URLS.
    #[arg(long = "rpc", global = true, value_delimiter = ',')]
    rpc: Vec<String>,

    /// Expected chain id of every endpoint.
    #[arg(long, global = true, default_value_t = DEFAULT_CHAIN_ID)]
    chain_id: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Backfill the flow of funds from a seed transaction, then optionally track live.
    Trace(TraceArgs),
    /// Validate the configured endpoints and report their chain head.
    Endpoints,
}

#[derive(Args, Debug)]
struct TraceArgs {
    /// Seed transaction hash.
    #[arg(long)]
    tx: B256,

    /// Token symbol: ETH, USTT, or the symbol of a custom --token-contract.
    #[arg(long, default_value = "ETH")]
    token: String,

    /// Custom ERC-20 contract to trace instead of a known token.
    #[arg(long)]
    token_contract: Option<Address>,

    #[arg(long, default_value_t = 18)]
    token_decimals: u8,

    /// Last block of the backfill. Defaults to the latest block.
    #[arg(long)]
    until_block: Option<u64>,

    /// Trailing blocks kept in the range cache (native tracing only).
    #[arg(long, default_value_t = DEFAULT_CACHE_DEPTH)]
    cache_depth: u64,

    /// Blocks per fetch job. Defaults to 13 for ETH and 400 for ERC-20 tokens.
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Dispatch tick period in milliseconds.
    #[arg(long, default_value_t = 1100)]
    tick_ms: u64,

    /// Watchlist service root. Falls back to FLOWTRACE_ALERT_URL.
    #[arg(long)]
    alert_url: Option<String>,

    /// Switch to live tracking after the backfill without asking.
    #[arg(long)]
    live: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Block-ordered transfer table.
    Table,
    /// Transfer list and graph projection as JSON.
    Json,
    /// Graphviz DOT of the transfer graph.
    Dot,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    let endpoints = resolve_endpoints(cli.rpc);

    match cli.command {
        Commands::Trace(args) => handle_trace(endpoints, cli.chain_id, args).await,
        Commands::Endpoints => handle_endpoints(endpoints, cli.chain_id).await,
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn resolve_endpoints(flags: Vec<String>) -> Vec<String> {
    let urls = if flags.is_empty() {
        std::env::var(RPC_URLS_ENV)
            .map(|value| value.split(',').map(str::to_string).collect())
            .unwrap_or_default()
    } else {
        flags
    };
    urls.into_iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect()
}

fn resolve_token(args: &TraceArgs) -> Result<Token> {
    match args.token_contract {
        Some(contract) => Ok(Token::erc20(
            args.token.to_ascii_uppercase(),
            contract,
            args.token_decimals,
        )),
        None => Token::from_symbol(&args.token).ok_or_else(|| {
            eyre!(
                "unknown token {}; use ETH, USTT or pass --token-contract",
                args.token
            )
        }),
    }
}

/// Resolves when the operator presses Ctrl-C.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C, termination disabled");
        std::future::pending::<()>().await;
    }
}

async fn handle_endpoints(endpoints: Vec<String>, chain_id: u64) -> Result<()> {
    let pool = RpcEndpoint::connect_pool(
        &endpoints,
        chain_id,
        flowtrace_data::rpc::VALIDATION_TIMEOUT,
    )
    .await
    .wrap_err("endpoint validation failed")?;

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["#", "Endpoint", "Chain Id", "Latest Block"]);
    for (i, endpoint) in pool.iter().enumerate() {
        let latest = endpoint
            .latest_block_number()
            .await
            .map(|n| n.to_string())
            .unwrap_or_else(|e| format!("error: {e}"));
        table.add_row(vec![
            i.to_string(),
            endpoint.url().to_string(),
            chain_id.to_string(),
            latest,
        ]);
    }
    println!("{}\n", table);
    Ok(())
}

async fn handle_trace(endpoints: Vec<String>, chain_id: u64, args: TraceArgs) -> Result<()> {
    let token = resolve_token(&args)?;
    let mut config = TraceConfig {
        endpoints,
        chain_id,
        token,
        seed_tx: Some(args.tx),
        until_block: args.until_block,
        cache_depth: args.cache_depth,
        chunk_size: args.chunk_size,
        alert_url: args
            .alert_url
            .clone()
            .or_else(|| std::env::var(ALERT_URL_ENV).ok()),
        ..TraceConfig::default()
    };
    config.timings.tick_ms = args.tick_ms;

    let tracer = Tracer::connect(config).await?;
    let mut dispatcher = tracer.backfill().await?;
    if let Some(seed) = dispatcher.state().seed_transfer() {
        print_seed(seed, dispatcher.state().token());
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}")
            .wrap_err("failed to create progress style")?,
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let outcome = dispatcher
        .run(ctrl_c(), |stats| pb.set_message(progress_message(stats)))
        .await;

    match outcome {
        BackfillOutcome::Drained { elapsed } => {
            pb.finish_with_message(format!("backfill finished in {}", format_elapsed(elapsed)));
        }
        BackfillOutcome::Cancelled {
            elapsed,
            dropped_jobs,
        } => {
            pb.abandon_with_message(format!(
                "backfill terminated after {} ({dropped_jobs} jobs dropped)",
                format_elapsed(elapsed)
            ));
            return print_report(dispatcher.state(), args.output);
        }
    }

    let state = dispatcher.into_state();
    print_report(&state, args.output)?;

    if !confirm_live(args.live)? {
        return Ok(());
    }

    let mut tracker = tracer.live(state);
    let recorded = tracker
        .run(ctrl_c())
        .await
        .wrap_err("live tracking failed")?;
    info!(recorded, "live tracking finished");

    print_report(tracker.state(), args.output)
}

fn progress_message(stats: &DispatchStats) -> String {
    format!(
        "queued {} ({} priority) | active {} | cooling {} | addresses {} | transfers {} | cached blocks {}",
        stats.queued,
        stats.prioritized,
        stats.active,
        stats.cooling,
        stats.addresses,
        stats.transfers,
        stats.cached_blocks
    )
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

/// `--live` answers for the operator; otherwise ask when attached to a terminal.
fn confirm_live(preconfirmed: bool) -> Result<bool> {
    if preconfirmed {
        return Ok(true);
    }
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return Ok(false);
    }

    print!("Backfill complete. Start live tracking? [y/N] ");
    std::io::stdout().flush().wrap_err("failed to flush stdout")?;
    let mut answer = String::new();
    stdin
        .lock()
        .read_line(&mut answer)
        .wrap_err("failed to read answer")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_seed(seed: &SeedTransfer, token: &Token) {
    let when = chrono::DateTime::from_timestamp(seed.timestamp as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| seed.timestamp.to_string());
    println!(
        "Seed {} in block {} ({when}): {} -> {} {}",
        seed.tx_hash,
        seed.block_number,
        seed.from,
        seed.to,
        token.format_amount(seed.amount)
    );
}

#[derive(Serialize)]
struct JsonReport<'a> {
    token: &'a str,
    seed: Option<&'a SeedTransfer>,
    addresses: usize,
    transfers: Vec<flowtrace_data::Transfer>,
    graph: &'a flowtrace_engine::GraphProjection,
}

fn print_report(state: &TraceState, format: OutputFormat) -> Result<()> {
    let projection = state.projection();
    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table.load_preset(UTF8_BORDERS_ONLY);
            table.set_header(vec!["Block", "Tx Hash", "From", "To", "Amount"]);
            for transfer in projection.transfer_list() {
                table.add_row(vec![
                    transfer.block_number.to_string(),
                    transfer.tx_hash.to_string(),
                    transfer.from.to_string(),
                    transfer.to.to_string(),
                    transfer.formatted_amount,
                ]);
            }
            println!("{}\n", table);
            println!(
                "Addresses: {} | Transfers: {}",
                state.ledger().len(),
                projection.transfer_count()
            );
        }
        OutputFormat::Json => {
            let report = JsonReport {
                token: &state.token().symbol,
                seed: state.seed_transfer(),
                addresses: state.ledger().len(),
                transfers: projection.transfer_list(),
                graph: projection,
            };
            let json_str =
                serde_json::to_string_pretty(&report).wrap_err("failed to serialize JSON")?;
            println!("{}", json_str);
        }
        OutputFormat::Dot => {
            let graph = projection
                .to_graph()
                .map(|_, address| address.to_string(), |_, t| t.formatted_amount.clone());
            println!("{}", Dot::new(&graph));
        }
    }
    Ok(())
}
