//! Relayer core logic.
//!
//! This crate provides the relayer's decision and delivery pipeline:
//! - Configuration loading, validation and per-feed triggers
//! - Time, cron and value-deviation update conditions
//! - The update-decision engine with gas-optimization widening
//! - Transaction delivery (auction race, fallback, bounded retries)
//! - The iteration runner
//!
//! Supports any chain adapter implementing [`relayer_chain::ChainAdapter`].

pub mod conditions;
pub mod config;
mod context;
mod delivery;
mod engine;
pub mod error;
mod gas_optimization;
mod runner;

#[cfg(test)]
mod test_support;

pub use config::{FeedTriggers, RelayerConfig, UpdateTrigger};
pub use context::{historical_timestamp, now_ms, ContextFetcher, HistoricalPackages, IterationContext};
pub use delivery::{
    AuctionLane, AuctionSettings, AuctionWin, CalldataRegenerator, DeliveryManager,
    DeliveryOutcome, DeliveryRequest, DeliverySettings, ReceiptMonitor,
};
pub use engine::{DecisionEngine, UpdateDecision};
pub use error::{ConfigError, ConfigResult, DeliveryError, DeliveryResult};
pub use gas_optimization::{augment, Candidate};
pub use runner::{IterationOutcome, IterationRunner, IterationTrigger};
