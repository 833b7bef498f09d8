//! Relayer configuration.
//!
//! This module provides:
//! - The TOML config file structure with defaults
//! - Loading with `${VAR}` expansion and startup validation
//! - Parsed per-feed triggers with the time-boxed override

pub(crate) mod loader;
mod relayer;
mod triggers;

pub use loader::DEFAULT_CONFIG_PATH;
pub use relayer::{
    AdapterConfig, AuctionConfig, ChainConfig, DeliveryConfig, FallbackConfig, FeedConfig,
    GasConfig, GasPricingModel, OptimizationConfig, RelayerConfig, TemporaryOverrideConfig,
    TimeoutConfig,
};
pub use triggers::{FeedTriggers, TemporaryOverride, UpdateTrigger};
