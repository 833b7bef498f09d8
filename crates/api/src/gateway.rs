//! HTTP client for signed package gateways.

use crate::packages::{
    FeedId, PackageSource, PackagesRequest, SignedDataPackage, SignedPackageSet,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::select_ok;
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Gateway response: package id -> packages from distinct signers.
type GatewayResponse = HashMap<String, Vec<SignedDataPackage>>;

/// Fetches packages from a set of redundant gateways.
///
/// All gateways are queried concurrently and the first successful response wins.
#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    urls: Vec<String>,
    timeout: Duration,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("urls", &self.urls)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GatewayClient {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            urls,
            timeout,
        }
    }

    fn endpoint(base: &str, request: &PackagesRequest) -> String {
        let base = base.trim_end_matches('/');
        match request.historical_timestamp_ms {
            Some(ts) => format!(
                "{}/v2/data-packages/historical/{}/{}",
                base, request.data_service_id, ts
            ),
            None => format!("{}/v2/data-packages/latest/{}", base, request.data_service_id),
        }
    }

    async fn fetch_from(&self, base: &str, request: &PackagesRequest) -> Result<GatewayResponse> {
        let url = Self::endpoint(base, request);
        debug!(url = %url, "Requesting data packages");

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Gateway {} unreachable", base))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gateway {} error: {} - {}", base, status, body);
        }

        let body: GatewayResponse = response
            .json()
            .await
            .with_context(|| format!("Gateway {} returned malformed packages", base))?;
        Ok(body)
    }
}

/// Keep authorized packages and, per feed, the first `unique_signers_count` distinct signers.
///
/// Feeds below the signer threshold are left out of the set (reported as missing upstream).
fn select_packages(response: GatewayResponse, request: &PackagesRequest) -> SignedPackageSet {
    let mut candidates: Vec<SignedDataPackage> = response
        .into_values()
        .flatten()
        .filter(|p| request.is_authorized(&p.signer_address))
        .collect();
    candidates.sort_by(|a, b| {
        a.data_package_id
            .cmp(&b.data_package_id)
            .then(a.signer_address.cmp(&b.signer_address))
    });

    let indexed = SignedPackageSet::from_packages(candidates, &request.data_feeds);
    let mut selected = SignedPackageSet::new();
    let required = request.unique_signers_count as usize;

    for feed_id in &request.data_feeds {
        let Some(packages) = indexed.get(feed_id) else {
            continue;
        };
        let mut signers = HashSet::new();
        let chosen: Vec<SignedDataPackage> = packages
            .iter()
            .filter(|p| signers.insert(p.signer_address))
            .take(required.max(1))
            .cloned()
            .collect();

        if chosen.len() < required {
            warn!(
                feed_id = %feed_id,
                signers = chosen.len(),
                required = required,
                "Not enough unique signers for feed"
            );
            continue;
        }
        selected.insert(FeedId::clone(feed_id), chosen);
    }

    selected
}

#[async_trait]
impl PackageSource for GatewayClient {
    #[instrument(skip(self, request), fields(
        data_service_id = %request.data_service_id,
        feeds = request.data_feeds.len(),
        historical = ?request.historical_timestamp_ms
    ))]
    async fn request_packages(&self, request: &PackagesRequest) -> Result<SignedPackageSet> {
        if self.urls.is_empty() {
            anyhow::bail!("No gateway URLs configured");
        }

        let attempts = self
            .urls
            .iter()
            .map(|url| self.fetch_from(url, request).boxed());
        let (response, _) = select_ok(attempts)
            .await
            .context("All gateways failed")?;

        let set = select_packages(response, request);
        debug!(feeds_with_packages = set.len(), "Data packages selected");
        Ok(set)
    }
}
