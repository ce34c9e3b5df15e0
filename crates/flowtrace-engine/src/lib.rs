//! flowtrace-engine crate
//!
//! Block-range job scheduler and traversal engine: turns a seed transfer into
//! bounded fetch jobs, dispatches them across a pool of RPC workers, follows
//! funds to newly discovered addresses and hands off to live tracking once the
//! backlog drains.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod job;
pub mod ledger;
pub mod live;
pub mod projection;
pub mod queue;
pub mod state;
pub mod tracer;
pub mod worker;

pub use config::{SchedulerTimings, TraceConfig};
pub use dispatch::{BackfillOutcome, DispatchStats, Dispatcher};
pub use error::JobError;
pub use fetch::{FetchStrategy, ObservedTransfer};
pub use job::Job;
pub use ledger::{AddressRecord, Ledger, ScanWindow};
pub use live::LiveTracker;
pub use projection::{GraphNode, GraphProjection};
pub use state::TraceState;
pub use tracer::Tracer;
