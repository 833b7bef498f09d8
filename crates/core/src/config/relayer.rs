//! Relayer configuration file structure.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use relayer_api::FeedId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure, deserialized from the relayer TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    /// Relayer name (for logging/identification)
    #[serde(default = "default_name")]
    pub name: String,

    pub chain: ChainConfig,

    pub adapter: AdapterConfig,

    /// Data service whose packages are relayed
    pub data_service_id: String,

    /// Gateways serving the latest packages
    pub gateway_urls: Vec<String>,

    /// Gateways serving historical packages (defaults to `gateway_urls`)
    #[serde(default)]
    pub historical_gateway_urls: Vec<String>,

    /// Optional signer allow-list
    #[serde(default)]
    pub authorized_signers: Option<Vec<Address>>,

    /// Feeds in declaration order; this order drives calldata construction
    pub feeds: Vec<FeedConfig>,

    #[serde(default = "default_iteration_interval")]
    pub iteration_interval_ms: u64,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub optimization: OptimizationConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub auction: Option<AuctionConfig>,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub healthcheck_ping_url: Option<String>,

    /// Time-boxed heartbeat override, counted from startup
    #[serde(default)]
    pub temporary_override: Option<TemporaryOverrideConfig>,

    /// Iterations are skipped while this instant is in the future
    #[serde(default)]
    pub paused_until: Option<DateTime<Utc>>,
}

fn default_name() -> String {
    "relayer".to_string()
}
fn default_iteration_interval() -> u64 {
    10_000
}

impl RelayerConfig {
    pub fn iteration_interval(&self) -> Duration {
        Duration::from_millis(self.iteration_interval_ms)
    }

    pub fn feed_ids(&self) -> Vec<FeedId> {
        self.feeds.iter().map(|f| f.id.clone()).collect()
    }

    pub fn historical_gateway_urls(&self) -> &[String] {
        if self.historical_gateway_urls.is_empty() {
            &self.gateway_urls
        } else {
            &self.historical_gateway_urls
        }
    }

    /// Enabled auction settings, if any.
    pub fn active_auction(&self) -> Option<&AuctionConfig> {
        self.auction.as_ref().filter(|a| a.enabled)
    }

    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.paused_until.is_some_and(|until| until > now)
    }
}

/// Chain the adapter lives on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,

    #[serde(default = "default_chain_name")]
    pub name: String,

    /// RPC endpoints, tried in order
    pub rpc_urls: Vec<String>,

    #[serde(default = "default_block_time")]
    pub block_time_ms: u64,

    #[serde(default)]
    pub gas: GasConfig,
}

fn default_chain_name() -> String {
    "unknown".to_string()
}
fn default_block_time() -> u64 {
    1000
}

impl ChainConfig {
    pub fn block_time(&self) -> Duration {
        Duration::from_millis(self.block_time_ms)
    }
}

/// Gas pricing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    #[serde(default)]
    pub pricing: GasPricingModel,
    /// Maximum gas price willing to pay (in gwei)
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price_gwei: f64,
    /// Fallback gas price when the node cannot answer (in gwei)
    #[serde(default = "default_gas_price")]
    pub default_gas_price_gwei: f64,
    /// Priority fee for EIP-1559 transactions (in gwei)
    #[serde(default)]
    pub priority_fee_gwei: Option<f64>,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Multiplier applied to fetched gas prices
    #[serde(default = "default_gas_multiplier")]
    pub gas_multiplier: f64,
}

fn default_max_gas_price() -> f64 {
    100.0
}
fn default_gas_price() -> f64 {
    1.0
}
fn default_gas_limit() -> u64 {
    1_000_000
}
fn default_gas_multiplier() -> f64 {
    1.125
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            pricing: GasPricingModel::default(),
            max_gas_price_gwei: default_max_gas_price(),
            default_gas_price_gwei: default_gas_price(),
            priority_fee_gwei: None,
            gas_limit: default_gas_limit(),
            gas_multiplier: default_gas_multiplier(),
        }
    }
}

/// Gas pricing model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GasPricingModel {
    /// Legacy gas pricing (gas price only)
    #[default]
    Legacy,
    /// EIP-1559 (base fee + priority fee)
    Eip1559,
}

impl GasPricingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "Legacy",
            Self::Eip1559 => "Eip1559",
        }
    }
}

/// Adapter contract the relayer writes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// `price-feeds` or `multi-feed`
    pub kind: String,
    pub contract_address: Address,
}

/// Update triggers of one feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub id: FeedId,
    /// Deviation threshold in percent
    #[serde(default)]
    pub deviation_percentage: Option<f64>,
    /// Maximum time between updates
    #[serde(default)]
    pub heartbeat_ms: Option<u64>,
    /// Cron expressions (5 or 6 fields)
    #[serde(default)]
    pub cron: Vec<String>,
}

impl FeedConfig {
    pub fn has_triggers(&self) -> bool {
        self.deviation_percentage.is_some() || self.heartbeat_ms.is_some() || !self.cron.is_empty()
    }
}

/// Deadlines for every external call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_single_provider")]
    pub single_provider_ms: u64,
    #[serde(default = "default_all_providers")]
    pub all_providers_ms: u64,
    #[serde(default = "default_auction_total")]
    pub auction_total_ms: u64,
    #[serde(default = "default_auction_resolve")]
    pub auction_resolve_ms: u64,
    #[serde(default = "default_verification")]
    pub verification_ms: u64,
    /// Also the freshness budget of built calldata
    #[serde(default = "default_expected_tx_delivery")]
    pub expected_tx_delivery_ms: u64,
    #[serde(default = "default_health_ping")]
    pub health_ping_ms: u64,
}

fn default_single_provider() -> u64 {
    5_000
}
fn default_all_providers() -> u64 {
    15_000
}
fn default_auction_total() -> u64 {
    30_000
}
fn default_auction_resolve() -> u64 {
    10_000
}
fn default_verification() -> u64 {
    15_000
}
fn default_expected_tx_delivery() -> u64 {
    20_000
}
fn default_health_ping() -> u64 {
    5_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            single_provider_ms: default_single_provider(),
            all_providers_ms: default_all_providers(),
            auction_total_ms: default_auction_total(),
            auction_resolve_ms: default_auction_resolve(),
            verification_ms: default_verification(),
            expected_tx_delivery_ms: default_expected_tx_delivery(),
            health_ping_ms: default_health_ping(),
        }
    }
}

impl TimeoutConfig {
    pub fn single_provider(&self) -> Duration {
        Duration::from_millis(self.single_provider_ms)
    }
    pub fn all_providers(&self) -> Duration {
        Duration::from_millis(self.all_providers_ms)
    }
    pub fn auction_total(&self) -> Duration {
        Duration::from_millis(self.auction_total_ms)
    }
    pub fn auction_resolve(&self) -> Duration {
        Duration::from_millis(self.auction_resolve_ms)
    }
    pub fn verification(&self) -> Duration {
        Duration::from_millis(self.verification_ms)
    }
    pub fn expected_tx_delivery(&self) -> Duration {
        Duration::from_millis(self.expected_tx_delivery_ms)
    }
    pub fn health_ping(&self) -> Duration {
        Duration::from_millis(self.health_ping_ms)
    }
}

/// Gas optimisation heuristics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Deviation ratio above which an idle feed joins an update; absent disables it
    #[serde(default)]
    pub additional_updates_deviation_threshold: Option<f64>,
    /// Pull in feeds whose heartbeat divides a heartbeat that fired
    #[serde(default)]
    pub sync_heartbeats: bool,
}

impl OptimizationConfig {
    pub fn is_enabled(&self) -> bool {
        self.additional_updates_deviation_threshold.is_some() || self.sync_heartbeats
    }
}

/// Fallback (delayed, historical) relayer mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Delay behind the main relayer; 0 disables fallback mode
    #[serde(default)]
    pub offset_ms: u64,
    #[serde(default)]
    pub skip_deviation_based_frequent_updates: bool,
    /// Always fetch historical packages instead of only when needed
    #[serde(default)]
    pub not_lazy: bool,
}

impl FallbackConfig {
    pub fn is_active(&self) -> bool {
        self.offset_ms > 0
    }
}

/// Private order-flow auction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    /// Skip the fallback transaction when the update had no hard deadline
    #[serde(default)]
    pub omit_fallback_when_optional: bool,
    #[serde(default)]
    pub verify_gas_price_disabled: bool,
}

fn default_true() -> bool {
    true
}

/// Standard delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_tx_send_attempts: u32,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_tx_send_attempts: default_max_attempts(),
        }
    }
}

/// Temporary heartbeat tightening.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TemporaryOverrideConfig {
    pub heartbeat_ms: u64,
    pub duration_ms: u64,
}
