//! Per-iteration snapshot of chain state and signed packages.
//!
//! Everything the decision engine reads is fetched here, once per iteration:
//! the block number first, then the adapter state and the signer threshold
//! pinned to that block, then the packages. Historical packages (fallback
//! mode only) are fetched lazily on first use and memoized for the rest of the
//! iteration.

use crate::config::{FallbackConfig, RelayerConfig};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use chrono::Utc;
use relayer_api::{FeedId, PackageSource, PackagesRequest, SignedPackageSet};
use relayer_chain::{ChainAdapter, ChainRpc, ContractData, ContractSnapshot};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

/// Historical packages are requested at this granularity.
const HISTORICAL_ROUNDING_MS: u64 = 10_000;

/// Wall clock in unix milliseconds.
pub fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

/// `now - offset`, rounded down to the historical gateway granularity.
pub fn historical_timestamp(now_ms: u64, fallback_offset_ms: u64) -> u64 {
    let ts = now_ms.saturating_sub(fallback_offset_ms);
    ts - ts % HISTORICAL_ROUNDING_MS
}

/// Lazily fetched historical package set.
pub struct HistoricalPackages {
    source: Option<(Arc<dyn PackageSource>, PackagesRequest)>,
    cell: OnceCell<Option<SignedPackageSet>>,
}

impl fmt::Debug for HistoricalPackages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoricalPackages")
            .field("fetched", &self.cell.initialized())
            .finish_non_exhaustive()
    }
}

impl HistoricalPackages {
    pub fn new(source: Arc<dyn PackageSource>, request: PackagesRequest) -> Self {
        Self {
            source: Some((source, request)),
            cell: OnceCell::new(),
        }
    }

    /// No historical source (fallback mode off).
    pub fn unavailable() -> Self {
        Self {
            source: None,
            cell: OnceCell::new(),
        }
    }

    pub fn preloaded(packages: SignedPackageSet) -> Self {
        Self {
            source: None,
            cell: OnceCell::new_with(Some(Some(packages))),
        }
    }

    /// Fetch on first call; later calls return the memoized result.
    ///
    /// A failed fetch is logged and memoized as `None`.
    pub async fn get(&self) -> Option<&SignedPackageSet> {
        self.cell
            .get_or_init(|| async {
                let (source, request) = self.source.as_ref()?;
                match source.request_packages(request).await {
                    Ok(packages) => {
                        debug!(
                            feeds = packages.len(),
                            timestamp = ?request.historical_timestamp_ms,
                            "Historical packages fetched"
                        );
                        Some(packages)
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to fetch historical packages");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    pub fn is_fetched(&self) -> bool {
        self.cell.initialized()
    }
}

/// Inputs of one iteration.
#[derive(Debug)]
pub struct IterationContext {
    pub block_number: u64,
    pub now_ms: u64,
    pub unique_signers_threshold: u8,
    pub contract_data: ContractData,
    pub packages: SignedPackageSet,
    pub historical: HistoricalPackages,
}

impl IterationContext {
    pub fn snapshot(&self, feed_id: &str) -> Option<&ContractSnapshot> {
        self.contract_data.get(feed_id)
    }
}

/// Builds an [`IterationContext`] from the adapter and the package sources.
#[derive(Clone)]
pub struct ContextFetcher {
    adapter: Arc<dyn ChainAdapter>,
    rpc: Arc<dyn ChainRpc>,
    packages: Arc<dyn PackageSource>,
    historical: Arc<dyn PackageSource>,
    feed_ids: Vec<FeedId>,
    data_service_id: String,
    authorized_signers: Option<Vec<Address>>,
    fallback: FallbackConfig,
}

impl fmt::Debug for ContextFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextFetcher")
            .field("adapter", &self.adapter.kind())
            .field("feeds", &self.feed_ids.len())
            .field("data_service_id", &self.data_service_id)
            .finish_non_exhaustive()
    }
}

impl ContextFetcher {
    pub fn new(
        config: &RelayerConfig,
        adapter: Arc<dyn ChainAdapter>,
        rpc: Arc<dyn ChainRpc>,
        packages: Arc<dyn PackageSource>,
        historical: Arc<dyn PackageSource>,
    ) -> Self {
        Self {
            adapter,
            rpc,
            packages,
            historical,
            feed_ids: config.feed_ids(),
            data_service_id: config.data_service_id.clone(),
            authorized_signers: config.authorized_signers.clone(),
            fallback: config.fallback.clone(),
        }
    }

    pub fn feed_ids(&self) -> &[FeedId] {
        &self.feed_ids
    }

    /// Request for the latest packages of `feed_ids`.
    pub fn packages_request(&self, feed_ids: Vec<FeedId>, threshold: u8) -> PackagesRequest {
        PackagesRequest::new(self.data_service_id.clone(), threshold, feed_ids)
            .with_authorized_signers(self.authorized_signers.clone())
    }

    pub fn package_source(&self) -> Arc<dyn PackageSource> {
        self.packages.clone()
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn fetch(&self) -> Result<IterationContext> {
        let block_number = self
            .rpc
            .block_number()
            .await
            .context("Failed to fetch block number")?;

        let (contract_data, unique_signers_threshold) = tokio::try_join!(
            self.adapter.read_last_update_state(&self.feed_ids, block_number),
            self.adapter.get_unique_signer_threshold(block_number),
        )?;

        let request = self.packages_request(self.feed_ids.clone(), unique_signers_threshold);
        let packages = self
            .packages
            .request_packages(&request)
            .await
            .context("Failed to fetch data packages")?;

        let now_ms = now_ms();
        let historical = if self.fallback.is_active() {
            let ts = historical_timestamp(now_ms, self.fallback.offset_ms);
            HistoricalPackages::new(self.historical.clone(), request.historical(ts))
        } else {
            HistoricalPackages::unavailable()
        };

        debug!(
            block_number = block_number,
            threshold = unique_signers_threshold,
            snapshots = contract_data.len(),
            packages = packages.len(),
            "Iteration context fetched"
        );

        Ok(IterationContext {
            block_number,
            now_ms,
            unique_signers_threshold,
            contract_data,
            packages,
            historical,
        })
    }
}
