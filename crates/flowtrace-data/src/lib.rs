//! flowtrace-data crate
//!
//! Chain-facing half of flowtrace: the RPC capability trait, the alloy-backed
//! endpoint, token metadata, seed transaction lookup and the watchlist alert
//! client.

pub mod alert;
pub mod lookup;
pub mod rpc;
pub mod source;
pub mod token;
pub mod types;

pub use source::{ChainSource, SourceError};
pub use types::{BlockContents, RawLog, SeedTransfer, Transfer, ValueTx};
