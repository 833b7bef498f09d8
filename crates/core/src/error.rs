//! Typed failure classes the relayer branches on.

use alloy::primitives::B256;
use relayer_api::FeedId;
use thiserror::Error;

/// Configuration problems. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Auction is enabled but no auction url is configured")]
    MissingAuctionUrl,

    #[error("Feed {0} has no update triggers configured")]
    NoTriggers(FeedId),

    #[error("Feed {0} is declared more than once")]
    DuplicateFeed(FeedId),

    #[error("Feed id {0} is longer than 31 bytes")]
    FeedIdTooLong(FeedId),

    #[error("Feed {feed_id} has an invalid deviation threshold: {value}")]
    InvalidDeviation { feed_id: FeedId, value: f64 },

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("No feeds configured")]
    NoFeeds,

    #[error("No RPC urls configured")]
    NoRpcUrls,

    #[error("No gateway urls configured")]
    NoGatewayUrls,

    #[error("Unsupported adapter type: {0}")]
    UnsupportedAdapter(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Failures of the optimistic auction path. Each of them hands control to the
/// fallback decision, never to the caller.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Auction phase timed out after {0} ms")]
    AuctionTimeout(u128),

    #[error("Auction leg for {feed_id} failed: {reason}")]
    AuctionLeg { feed_id: String, reason: String },

    #[error("No auction leg passed verification")]
    NoVerifiedLeg,

    #[error("Auction transaction {hash} targets {target:?}, expected the adapter")]
    WrongTarget { hash: B256, target: Option<alloy::primitives::Address> },

    #[error("Auction transaction {hash} was reverted")]
    Reverted { hash: B256 },

    #[error("Auction transaction {hash} offers {offered} wei, below the current {current} wei")]
    GasPriceTooLow {
        hash: B256,
        offered: u128,
        current: u128,
    },

    #[error("Auction transaction {hash} does not update {feed_id}: simulated {simulated}, expected {expected}")]
    PriceMismatch {
        hash: B256,
        feed_id: FeedId,
        simulated: f64,
        expected: f64,
    },

    #[error("Verification of {hash} timed out")]
    VerificationTimeout { hash: B256 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;
