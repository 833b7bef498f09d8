//! Auction phase of delivery.
//!
//! The update is offered to the private order-flow auction in one or more
//! legs (one per feed for per-feed adapters, a single batch leg otherwise).
//! Every leg is signed, submitted and its returned transactions verified on
//! chain. Legs race each other: the first verified leg wins and the rest are
//! dropped. The whole phase is bounded by the total auction timeout.
//!
//! A returned transaction is verified when, within the verification timeout,
//! it is included successfully, a simulation shows it writes the values the
//! gateways served, and (unless disabled) its fee still covers the network
//! gas price.

use crate::conditions::contract_value_as_decimal;
use crate::error::{DeliveryError, DeliveryResult};
use alloy::primitives::{Bytes, B256, U256};
use anyhow::anyhow;
use futures::stream::{FuturesUnordered, StreamExt};
use relayer_api::{AuctionClient, AuctionRequest, DataPoint, FeedId, SignedPackageSet};
use relayer_chain::{
    decode_signed_transaction, wait_for_receipt, ChainAdapter, ChainRpc, DecodedTx,
    DeliveryCall, TxSubmitter, UpdateScope,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Label of the single leg used by all-feeds adapters.
const BATCH_LEG: &str = "all-feeds";

/// Relative difference tolerated between simulated and served values.
const PRICE_TOLERANCE: f64 = 0.00001;

#[derive(Debug, Clone)]
pub struct AuctionSettings {
    /// Bound on the whole phase
    pub total: Duration,
    /// Bound on one auction request
    pub resolve: Duration,
    /// Bound on all checks of one returned transaction
    pub verification: Duration,
    pub poll_interval: Duration,
    pub verify_gas_price: bool,
    pub omit_fallback_when_optional: bool,
}

/// A verified auction leg.
#[derive(Debug, Clone, PartialEq)]
pub struct AuctionWin {
    pub leg: FeedId,
    pub tx_hash: B256,
}

pub struct AuctionLane {
    client: Arc<dyn AuctionClient>,
    adapter: Arc<dyn ChainAdapter>,
    rpc: Arc<dyn ChainRpc>,
    signer: Arc<dyn TxSubmitter>,
    chain_id: u64,
    settings: AuctionSettings,
}

impl fmt::Debug for AuctionLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuctionLane")
            .field("client", &self.client)
            .field("chain_id", &self.chain_id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AuctionLane {
    pub fn new(
        client: Arc<dyn AuctionClient>,
        adapter: Arc<dyn ChainAdapter>,
        rpc: Arc<dyn ChainRpc>,
        signer: Arc<dyn TxSubmitter>,
        chain_id: u64,
        settings: AuctionSettings,
    ) -> Self {
        Self {
            client,
            adapter,
            rpc,
            signer,
            chain_id,
            settings,
        }
    }

    pub fn omit_fallback_when_optional(&self) -> bool {
        self.settings.omit_fallback_when_optional
    }

    /// One call per leg.
    fn legs(
        &self,
        call: &DeliveryCall,
        packages: &SignedPackageSet,
        metadata_timestamp_ms: u64,
    ) -> DeliveryResult<Vec<(FeedId, DeliveryCall)>> {
        match self.adapter.update_scope() {
            UpdateScope::AllFeeds => Ok(vec![(BATCH_LEG.to_string(), call.clone())]),
            UpdateScope::PerFeed => call
                .feed_ids
                .iter()
                .map(|feed_id| -> DeliveryResult<(FeedId, DeliveryCall)> {
                    let leg = self.adapter.build_update_calldata(
                        std::slice::from_ref(feed_id),
                        packages,
                        metadata_timestamp_ms,
                    )?;
                    Ok((feed_id.clone(), leg))
                })
                .collect(),
        }
    }

    /// Run every leg concurrently and return the first verified one.
    /// Simulations run on top of `block_number`.
    #[instrument(skip_all, fields(feeds = call.feed_ids.len()))]
    pub async fn run(
        &self,
        call: &DeliveryCall,
        packages: &SignedPackageSet,
        metadata_timestamp_ms: u64,
        block_number: u64,
    ) -> DeliveryResult<AuctionWin> {
        let legs = self.legs(call, packages, metadata_timestamp_ms)?;
        debug!(legs = legs.len(), "Starting auction");

        let race = async {
            let mut pending: FuturesUnordered<_> = legs
                .into_iter()
                .map(|(leg, call)| self.run_leg(leg, call, packages, block_number))
                .collect();
            while let Some(result) = pending.next().await {
                match result {
                    Ok(win) => return Ok(win),
                    Err(e) => warn!(error = %e, "Auction leg failed"),
                }
            }
            Err(DeliveryError::NoVerifiedLeg)
        };

        tokio::time::timeout(self.settings.total, race)
            .await
            .map_err(|_| DeliveryError::AuctionTimeout(self.settings.total.as_millis()))?
    }

    async fn run_leg(
        &self,
        leg: FeedId,
        call: DeliveryCall,
        packages: &SignedPackageSet,
        block_number: u64,
    ) -> DeliveryResult<AuctionWin> {
        let leg_error = |reason: String| DeliveryError::AuctionLeg {
            feed_id: leg.clone(),
            reason,
        };

        let adapter = self.adapter.contract_address();
        let message = AuctionRequest::signing_message(self.chain_id, adapter, &call.data);
        let signature = self.signer.sign_message(message.as_bytes()).await?;
        let request = AuctionRequest {
            adapter,
            update_payload: call.data.clone(),
            signature,
            early_return: true,
            chain_id: format!("{:#x}", self.chain_id),
        };

        let blobs = tokio::time::timeout(
            self.settings.resolve,
            self.client.submit_for_auction(&request, &leg),
        )
        .await
        .map_err(|_| leg_error(format!("no answer within {:?}", self.settings.resolve)))?
        .map_err(|e| leg_error(e.to_string()))?;

        if blobs.is_empty() {
            return Err(leg_error("auction returned no transactions".into()));
        }

        let mut verifications: FuturesUnordered<_> = blobs
            .iter()
            .map(|blob| self.verify(blob, &call.feed_ids, packages, block_number))
            .collect();
        let mut last_error = leg_error("no transaction verified".into());
        while let Some(result) = verifications.next().await {
            match result {
                Ok(tx_hash) => {
                    info!(leg = %leg, tx_hash = %tx_hash, "Auction transaction verified");
                    return Ok(AuctionWin { leg, tx_hash });
                }
                Err(e) => {
                    debug!(leg = %leg, error = %e, "Auction transaction rejected");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Check one returned transaction of a leg updating `feed_ids`.
    async fn verify(
        &self,
        blob: &Bytes,
        feed_ids: &[FeedId],
        packages: &SignedPackageSet,
        block_number: u64,
    ) -> DeliveryResult<B256> {
        let tx = decode_signed_transaction(blob)?;
        let hash = tx.hash;

        if tx.to != Some(self.adapter.contract_address()) {
            return Err(DeliveryError::WrongTarget {
                hash,
                target: tx.to,
            });
        }

        if let Err(e) = self.rpc.send_raw_transaction(tx.raw.clone()).await {
            debug!(tx_hash = %hash, error = %e, "Auction transaction not re-propagated");
        }

        let checks = async {
            tokio::try_join!(
                self.check_updates_prices(&tx, feed_ids, packages, block_number),
                self.check_included(hash),
                self.check_gas_price(&tx),
            )
        };
        tokio::time::timeout(self.settings.verification, checks)
            .await
            .map_err(|_| DeliveryError::VerificationTimeout { hash })??;

        Ok(hash)
    }

    async fn check_updates_prices(
        &self,
        tx: &DecodedTx,
        feed_ids: &[FeedId],
        packages: &SignedPackageSet,
        block_number: u64,
    ) -> DeliveryResult<()> {
        let values = self
            .adapter
            .simulate_update(&tx.input, feed_ids, block_number)
            .await?;
        check_simulated_values(tx.hash, feed_ids, &values, packages)?;
        debug!(tx_hash = %tx.hash, "Auction transaction updates prices");
        Ok(())
    }

    async fn check_included(&self, hash: B256) -> DeliveryResult<()> {
        let receipt = wait_for_receipt(
            self.rpc.as_ref(),
            hash,
            self.settings.poll_interval,
            self.settings.verification,
        )
        .await
        .map_err(|_| DeliveryError::VerificationTimeout { hash })?;
        if !receipt.success {
            return Err(DeliveryError::Reverted { hash });
        }
        Ok(())
    }

    async fn check_gas_price(&self, tx: &DecodedTx) -> DeliveryResult<()> {
        if !self.settings.verify_gas_price {
            return Ok(());
        }
        let current = self.rpc.gas_price().await?;
        debug!(
            tx_hash = %tx.hash,
            max_fee_per_gas = tx.max_fee_per_gas,
            gas_price = current,
            "Auction transaction gas check"
        );
        if current > tx.max_fee_per_gas {
            return Err(DeliveryError::GasPriceTooLow {
                hash: tx.hash,
                offered: tx.max_fee_per_gas,
                current,
            });
        }
        Ok(())
    }
}

/// Compare simulated contract values with the average served value per feed.
fn check_simulated_values(
    hash: B256,
    feed_ids: &[FeedId],
    values: &[U256],
    packages: &SignedPackageSet,
) -> DeliveryResult<()> {
    if values.len() != feed_ids.len() {
        return Err(anyhow!(
            "Simulation returned {} values for {} feeds",
            values.len(),
            feed_ids.len()
        )
        .into());
    }

    for (feed_id, value) in feed_ids.iter().zip(values) {
        let points: Vec<&DataPoint> = packages
            .get(feed_id)
            .unwrap_or_default()
            .iter()
            .flat_map(|p| p.points_for(feed_id))
            .collect();
        let Some(first) = points.first() else {
            return Err(anyhow!("There are no data packages for {}", feed_id).into());
        };

        let decimals = first.decimals();
        let scale = 10f64.powi(decimals as i32);
        let expected =
            points.iter().map(|p| (p.value * scale).round() / scale).sum::<f64>() / points.len() as f64;
        let simulated = contract_value_as_decimal(*value, decimals);

        if !almost_equal(expected, simulated) {
            return Err(DeliveryError::PriceMismatch {
                hash,
                feed_id: feed_id.clone(),
                simulated,
                expected,
            });
        }
    }
    Ok(())
}

fn almost_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= PRICE_TOLERANCE * a.abs().max(b.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        package_set, receipt, signed_tx, MockAdapter, MockAuction, MockRpc, MockSubmitter, ADAPTER,
    };
    use alloy::primitives::Address;
    use relayer_chain::ContractData;

    const BLOCK: u64 = 100;

    fn settings() -> AuctionSettings {
        AuctionSettings {
            total: Duration::from_secs(2),
            resolve: Duration::from_secs(1),
            verification: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
            verify_gas_price: true,
            omit_fallback_when_optional: false,
        }
    }

    fn lane(
        auction: MockAuction,
        scope: UpdateScope,
        rpc: Arc<MockRpc>,
        settings: AuctionSettings,
    ) -> (AuctionLane, Arc<MockAdapter>, Arc<MockSubmitter>) {
        let adapter = MockAdapter::new(scope, ContractData::new());
        let signer = Arc::new(MockSubmitter::default());
        let lane = AuctionLane::new(
            Arc::new(auction),
            adapter.clone(),
            rpc,
            signer.clone(),
            31337,
            settings,
        );
        (lane, adapter, signer)
    }

    fn eth() -> Vec<FeedId> {
        vec!["ETH".to_string()]
    }

    #[tokio::test]
    async fn test_first_verified_leg_wins() {
        let rpc = MockRpc::new();
        let (hash, blob) = signed_tx(ADAPTER, 10).await;
        rpc.add_receipt(receipt(hash, true));
        let auction = MockAuction::default()
            .respond("ETH", Err("timeout".into()))
            .respond("BTC", Ok(vec![blob]));

        let (lane, adapter, signer) = lane(auction, UpdateScope::PerFeed, rpc, settings());
        let call = adapter.call(&["ETH", "BTC"]);
        let packages = package_set(&[("ETH", 1.0), ("BTC", 1.0)], 1_000);

        let win = lane.run(&call, &packages, 1_000, BLOCK).await.unwrap();
        assert_eq!(win, AuctionWin { leg: "BTC".into(), tx_hash: hash });
        assert_eq!(signer.signed.lock().len(), 2);
        assert!(signer.signed.lock()[0].starts_with("0x7a69:"));
        assert_eq!(adapter.built.lock().len(), 2);
        // the winning leg was simulated for its own feed at the iteration block
        assert_eq!(*adapter.simulations.lock(), vec![(vec!["BTC".to_string()], BLOCK)]);
    }

    #[tokio::test]
    async fn test_leg_failing_verification_loses_to_verified_leg() {
        let rpc = MockRpc::new();
        let (_, never_mined) = signed_tx(ADAPTER, 10).await;
        let (hash, mined) = signed_tx(ADAPTER, 10).await;
        rpc.add_receipt(receipt(hash, true));
        let auction = MockAuction::default()
            .respond("ETH", Ok(vec![never_mined.clone()]))
            .respond("BTC", Ok(vec![mined]));

        let (lane, adapter, _) = lane(auction, UpdateScope::PerFeed, rpc, settings());
        let packages = package_set(&[("ETH", 1.0), ("BTC", 1.0)], 1_000);

        let win = lane
            .run(&adapter.call(&["ETH", "BTC"]), &packages, 1_000, BLOCK)
            .await
            .unwrap();
        assert_eq!(win, AuctionWin { leg: "BTC".into(), tx_hash: hash });

        let lost = lane
            .run_leg("ETH".into(), adapter.call(&["ETH"]), &packages, BLOCK)
            .await
            .unwrap_err();
        assert!(matches!(lost, DeliveryError::VerificationTimeout { .. }));
    }

    #[tokio::test]
    async fn test_all_feeds_adapter_uses_one_leg() {
        let rpc = MockRpc::new();
        let (hash, blob) = signed_tx(ADAPTER, 10).await;
        rpc.add_receipt(receipt(hash, true));
        let auction = MockAuction::default().respond(BATCH_LEG, Ok(vec![blob]));

        let (lane, adapter, _) = lane(auction, UpdateScope::AllFeeds, rpc, settings());
        let call = adapter.call(&["ETH", "BTC"]);
        let win = lane
            .run(&call, &package_set(&[("ETH", 1.0), ("BTC", 1.0)], 1), 1, BLOCK)
            .await
            .unwrap();
        assert_eq!(win.leg, BATCH_LEG);
        assert!(adapter.built.lock().is_empty());
        assert_eq!(adapter.simulations.lock()[0].0, vec!["ETH".to_string(), "BTC".to_string()]);
    }

    #[tokio::test]
    async fn test_all_legs_failing() {
        let rpc = MockRpc::new();
        let auction = MockAuction::default().respond("*", Err("no bids".into()));
        let (lane, adapter, _) = lane(auction, UpdateScope::PerFeed, rpc, settings());
        let call = adapter.call(&["ETH"]);
        let err = lane
            .run(&call, &package_set(&[("ETH", 1.0)], 1), 1, BLOCK)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::NoVerifiedLeg));
    }

    #[tokio::test]
    async fn test_total_timeout() {
        let rpc = MockRpc::new();
        let auction = MockAuction::default()
            .respond("*", Ok(vec![]))
            .with_delay(Duration::from_millis(500));
        let settings = AuctionSettings {
            total: Duration::from_millis(50),
            ..settings()
        };
        let (lane, adapter, _) = lane(auction, UpdateScope::PerFeed, rpc, settings);
        let call = adapter.call(&["ETH"]);
        let err = lane
            .run(&call, &package_set(&[("ETH", 1.0)], 1), 1, BLOCK)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::AuctionTimeout(50)));
    }

    #[tokio::test]
    async fn test_verification_rejections() {
        let rpc = MockRpc::new();
        let (lane, _, _) = lane(MockAuction::default(), UpdateScope::PerFeed, rpc.clone(), settings());
        let packages = package_set(&[("ETH", 1.0)], 1);

        let (_, wrong) = signed_tx(Address::repeat_byte(0x01), 10).await;
        assert!(matches!(
            lane.verify(&wrong, &eth(), &packages, BLOCK).await,
            Err(DeliveryError::WrongTarget { .. })
        ));

        let (reverted_hash, reverted) = signed_tx(ADAPTER, 10).await;
        rpc.add_receipt(receipt(reverted_hash, false));
        assert!(matches!(
            lane.verify(&reverted, &eth(), &packages, BLOCK).await,
            Err(DeliveryError::Reverted { .. })
        ));

        let (cheap_hash, cheap) = signed_tx(ADAPTER, 10).await;
        rpc.add_receipt(receipt(cheap_hash, true));
        *rpc.gas_price.lock() = 11;
        assert!(matches!(
            lane.verify(&cheap, &eth(), &packages, BLOCK).await,
            Err(DeliveryError::GasPriceTooLow { offered: 10, current: 11, .. })
        ));
        *rpc.gas_price.lock() = 1;

        let (_, pending) = signed_tx(ADAPTER, 10).await;
        assert!(matches!(
            lane.verify(&pending, &eth(), &packages, BLOCK).await,
            Err(DeliveryError::VerificationTimeout { .. })
        ));
        // every decodable blob was re-propagated
        assert_eq!(rpc.sent.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_transaction_writing_other_values_is_rejected() {
        let rpc = MockRpc::new();
        let (lane, adapter, _) = lane(MockAuction::default(), UpdateScope::PerFeed, rpc.clone(), settings());
        let (hash, blob) = signed_tx(ADAPTER, 10).await;
        rpc.add_receipt(receipt(hash, true));
        adapter.simulated.lock().insert("ETH".into(), 1.5);

        let err = lane
            .verify(&blob, &eth(), &package_set(&[("ETH", 1.0)], 1), BLOCK)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::PriceMismatch { ref feed_id, simulated, expected, .. }
                if feed_id == "ETH" && simulated == 1.5 && expected == 1.0
        ));
    }

    #[tokio::test]
    async fn test_slow_gas_price_lookup_hits_verification_timeout() {
        let rpc = MockRpc::new();
        let (lane, _, _) = lane(MockAuction::default(), UpdateScope::PerFeed, rpc.clone(), settings());
        let (hash, blob) = signed_tx(ADAPTER, 10).await;
        rpc.add_receipt(receipt(hash, true));
        *rpc.gas_price_delay.lock() = Duration::from_secs(5);

        let started = std::time::Instant::now();
        let err = lane
            .verify(&blob, &eth(), &package_set(&[("ETH", 1.0)], 1), BLOCK)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::VerificationTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_gas_check_can_be_disabled() {
        let rpc = MockRpc::new();
        let settings = AuctionSettings {
            verify_gas_price: false,
            ..settings()
        };
        let (lane, _, _) = lane(MockAuction::default(), UpdateScope::PerFeed, rpc.clone(), settings);
        let (hash, blob) = signed_tx(ADAPTER, 10).await;
        rpc.add_receipt(receipt(hash, true));
        *rpc.gas_price.lock() = 1_000;
        assert_eq!(
            lane.verify(&blob, &eth(), &package_set(&[("ETH", 1.0)], 1), BLOCK)
                .await
                .unwrap(),
            hash
        );
    }

    #[test]
    fn test_simulated_values_compared_with_average() {
        let hash = B256::ZERO;
        let mut packages = package_set(&[("ETH", 100.0)], 1);
        let second = package_set(&[("ETH", 102.0)], 1);
        let mut eth_packages = packages.get("ETH").unwrap().to_vec();
        eth_packages.extend_from_slice(second.get("ETH").unwrap());
        packages.insert("ETH", eth_packages);

        // average of 100 and 102 with 8 decimals
        let average = U256::from(10_100_000_000u64);
        assert!(check_simulated_values(hash, &eth(), &[average], &packages).is_ok());

        let off = U256::from(10_200_000_000u64);
        assert!(matches!(
            check_simulated_values(hash, &eth(), &[off], &packages),
            Err(DeliveryError::PriceMismatch { .. })
        ));
        assert!(check_simulated_values(hash, &["BTC".to_string()], &[average], &packages).is_err());
        assert!(check_simulated_values(hash, &eth(), &[], &packages).is_err());
    }
}
