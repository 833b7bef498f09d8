//! Off-chain collaborators of the relayer.
//!
//! This crate provides:
//! - The signed data package model (`SignedPackageSet`) shared by every other crate
//! - Gateway clients that fetch latest and historical packages over HTTP
//! - The private order-flow auction client
//! - The health-check pinger

mod auction;
mod gateway;
mod healthcheck;
mod packages;

pub use auction::{AuctionClient, AuctionRequest, HttpAuctionClient};
pub use gateway::GatewayClient;
pub use healthcheck::{HealthMonitor, HealthcheckPinger};
pub use packages::{
    DataPoint, FeedId, PackageSource, PackagesRequest, SignedDataPackage, SignedPackageSet,
    DEFAULT_NUM_DECIMALS,
};
