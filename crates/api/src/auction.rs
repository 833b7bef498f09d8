//! Client for the private order-flow (OEV) auction endpoint.

use alloy::primitives::{Address, Bytes};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, instrument};

/// Body of an auction request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionRequest {
    /// Adapter contract receiving the update
    pub adapter: Address,
    /// Full update calldata
    pub update_payload: Bytes,
    /// Relayer signature over `"<chainIdHex>:<adapter>:<payloadHex>"`
    pub signature: Bytes,
    pub early_return: bool,
    /// Chain id as `0x`-prefixed hex
    pub chain_id: String,
}

impl AuctionRequest {
    /// Message the relayer signs to authenticate the request.
    pub fn signing_message(chain_id: u64, adapter: Address, payload: &Bytes) -> String {
        format!("{:#x}:{}:{}", chain_id, adapter.to_checksum(None), payload)
    }
}

/// Submits an update for auction and returns the winning signed transactions.
#[async_trait]
pub trait AuctionClient: Send + Sync + Debug {
    async fn submit_for_auction(&self, request: &AuctionRequest, feed_id: &str) -> Result<Vec<Bytes>>;
}

/// JSON-over-HTTP auction client.
#[derive(Clone)]
pub struct HttpAuctionClient {
    client: reqwest::Client,
    url: String,
    /// Deadline for the auction to resolve
    resolve_timeout: Duration,
}

impl Debug for HttpAuctionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuctionClient")
            .field("url", &self.url)
            .field("resolve_timeout", &self.resolve_timeout)
            .finish()
    }
}

impl HttpAuctionClient {
    pub fn new(url: impl Into<String>, resolve_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            resolve_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AuctionClient for HttpAuctionClient {
    #[instrument(skip(self, request), fields(adapter = %request.adapter))]
    async fn submit_for_auction(&self, request: &AuctionRequest, feed_id: &str) -> Result<Vec<Bytes>> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.resolve_timeout)
            .json(request)
            .send()
            .await
            .context("Auction endpoint unreachable")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Auction error for {}: {} - {}", feed_id, status, body);
        }

        let signed: Vec<Bytes> = response
            .json()
            .await
            .context("Auction returned malformed transactions")?;
        if signed.is_empty() {
            anyhow::bail!("Auction for {} returned no transactions", feed_id);
        }

        debug!(feed_id = feed_id, txs = signed.len(), "Auction resolved");
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_message() {
        let adapter: Address = "0x5fbdb2315678afecb367f032d93f642f64180aa3".parse().unwrap();
        let payload = Bytes::from(vec![0xab, 0xcd]);
        assert_eq!(
            AuctionRequest::signing_message(42161, adapter, &payload),
            "0xa4b1:0x5FbDB2315678afecb367f032d93F642f64180aa3:0xabcd"
        );
    }

    #[test]
    fn test_request_serialization() {
        let request = AuctionRequest {
            adapter: Address::ZERO,
            update_payload: Bytes::from(vec![1]),
            signature: Bytes::from(vec![2]),
            early_return: true,
            chain_id: "0x1".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["earlyReturn"], true);
        assert_eq!(json["updatePayload"], "0x01");
        assert_eq!(json["chainId"], "0x1");
    }
}
