//! Signed data package model.
//!
//! A package is one signer's timestamped observation of one or more feeds. The
//! relayer fetches a `SignedPackageSet` once per iteration and treats it as an
//! immutable value for the rest of that iteration.

use alloy::primitives::{Address, Bytes};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Debug;

/// Opaque feed identifier (e.g. `"ETH"`), unique within a relayer config.
pub type FeedId = String;

/// Decimals assumed when a data point does not carry its own.
pub const DEFAULT_NUM_DECIMALS: u8 = 8;

/// Single numeric observation inside a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub data_feed_id: FeedId,
    pub value: f64,
    #[serde(default)]
    pub decimals: Option<u8>,
}

impl DataPoint {
    pub fn new(data_feed_id: impl Into<FeedId>, value: f64) -> Self {
        Self {
            data_feed_id: data_feed_id.into(),
            value,
            decimals: None,
        }
    }

    /// Decimals used to scale this value on-chain.
    pub fn decimals(&self) -> u8 {
        self.decimals.unwrap_or(DEFAULT_NUM_DECIMALS)
    }
}

/// Package signed by one off-chain signer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedDataPackage {
    /// Package identifier (a feed id, or a group id for multi-point packages)
    pub data_package_id: String,
    pub timestamp_milliseconds: u64,
    pub signer_address: Address,
    pub data_points: Vec<DataPoint>,
    /// 65-byte `r || s || v` signature
    pub signature: Bytes,
}

impl SignedDataPackage {
    /// Data points of this package that belong to `feed_id`.
    pub fn points_for<'a>(&'a self, feed_id: &'a str) -> impl Iterator<Item = &'a DataPoint> + 'a {
        self.data_points
            .iter()
            .filter(move |dp| dp.data_feed_id == feed_id)
    }

    pub fn contains_feed(&self, feed_id: &str) -> bool {
        self.data_points.iter().any(|dp| dp.data_feed_id == feed_id)
    }
}

/// Packages fetched for one iteration, indexed by the feed they serve.
///
/// A multi-point package is listed under every requested feed it carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignedPackageSet {
    packages: BTreeMap<FeedId, Vec<SignedDataPackage>>,
}

impl SignedPackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-index a gateway response (keyed by package id) by the requested feeds.
    pub fn from_packages<'a>(
        packages: impl IntoIterator<Item = SignedDataPackage>,
        requested_feeds: impl IntoIterator<Item = &'a FeedId>,
    ) -> Self {
        let requested: HashSet<&str> = requested_feeds.into_iter().map(String::as_str).collect();
        let mut set = Self::new();
        for package in packages {
            let feeds: BTreeSet<&str> = package
                .data_points
                .iter()
                .map(|dp| dp.data_feed_id.as_str())
                .filter(|id| requested.contains(id))
                .collect();
            for feed in feeds {
                set.packages
                    .entry(feed.to_string())
                    .or_default()
                    .push(package.clone());
            }
        }
        set
    }

    pub fn insert(&mut self, feed_id: impl Into<FeedId>, packages: Vec<SignedDataPackage>) {
        self.packages.insert(feed_id.into(), packages);
    }

    pub fn get(&self, feed_id: &str) -> Option<&[SignedDataPackage]> {
        self.packages
            .get(feed_id)
            .map(Vec::as_slice)
            .filter(|p| !p.is_empty())
    }

    pub fn contains_feed(&self, feed_id: &str) -> bool {
        self.get(feed_id).is_some()
    }

    pub fn feed_ids(&self) -> impl Iterator<Item = &FeedId> {
        self.packages.keys()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.values().all(Vec::is_empty)
    }

    /// Timestamp proposed for `feed_id`: the oldest package timestamp listed under it.
    pub fn timestamp_for(&self, feed_id: &str) -> Option<u64> {
        self.get(feed_id)?
            .iter()
            .map(|p| p.timestamp_milliseconds)
            .min()
    }

    /// Oldest timestamp across all packages of the set.
    pub fn min_timestamp(&self) -> Option<u64> {
        self.packages
            .values()
            .flatten()
            .map(|p| p.timestamp_milliseconds)
            .min()
    }

    /// Distinct package identifiers feeding `feed_id`.
    ///
    /// More than one entry means two package groupings overlap on this feed.
    pub fn package_ids_for(&self, feed_id: &str) -> BTreeSet<&str> {
        self.get(feed_id)
            .unwrap_or_default()
            .iter()
            .map(|p| p.data_package_id.as_str())
            .collect()
    }

    /// Signers that contributed more than one package for `feed_id`.
    pub fn duplicate_signers_for(&self, feed_id: &str) -> Vec<Address> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for package in self.get(feed_id).unwrap_or_default() {
            if !seen.insert(package.signer_address) && !duplicates.contains(&package.signer_address) {
                duplicates.push(package.signer_address);
            }
        }
        duplicates
    }

    /// Feeds that share at least one package with `feed_id`.
    pub fn feeds_sharing_packages_with(&self, feed_id: &str) -> BTreeSet<&str> {
        self.get(feed_id)
            .unwrap_or_default()
            .iter()
            .flat_map(|p| p.data_points.iter().map(|dp| dp.data_feed_id.as_str()))
            .filter(|id| *id != feed_id && self.contains_feed(id))
            .collect()
    }

    /// Unique packages needed to update `feed_ids`, in feed order.
    ///
    /// A package shared by several feeds is emitted once.
    pub fn packages_for_feeds(&self, feed_ids: &[FeedId]) -> Vec<&SignedDataPackage> {
        let mut seen: HashSet<(&str, Address)> = HashSet::new();
        let mut out = Vec::new();
        for feed_id in feed_ids {
            for package in self.get(feed_id).unwrap_or_default() {
                if seen.insert((package.data_package_id.as_str(), package.signer_address)) {
                    out.push(package);
                }
            }
        }
        out
    }
}

/// Parameters of a package request.
#[derive(Debug, Clone, PartialEq)]
pub struct PackagesRequest {
    pub data_service_id: String,
    pub unique_signers_count: u8,
    pub data_feeds: Vec<FeedId>,
    /// Optional allow-list; packages from other signers are discarded
    pub authorized_signers: Option<Vec<Address>>,
    /// When set, packages are requested as of this timestamp instead of latest
    pub historical_timestamp_ms: Option<u64>,
}

impl PackagesRequest {
    pub fn new(
        data_service_id: impl Into<String>,
        unique_signers_count: u8,
        data_feeds: Vec<FeedId>,
    ) -> Self {
        Self {
            data_service_id: data_service_id.into(),
            unique_signers_count,
            data_feeds,
            authorized_signers: None,
            historical_timestamp_ms: None,
        }
    }

    pub fn with_authorized_signers(mut self, signers: Option<Vec<Address>>) -> Self {
        self.authorized_signers = signers;
        self
    }

    /// Same request, pinned to a historical timestamp.
    pub fn historical(&self, timestamp_ms: u64) -> Self {
        Self {
            historical_timestamp_ms: Some(timestamp_ms),
            ..self.clone()
        }
    }

    pub fn is_authorized(&self, signer: &Address) -> bool {
        self.authorized_signers
            .as_ref()
            .map_or(true, |allowed| allowed.contains(signer))
    }
}

/// Source of signed packages.
#[async_trait]
pub trait PackageSource: Send + Sync + Debug {
    async fn request_packages(&self, request: &PackagesRequest) -> Result<SignedPackageSet>;
}
