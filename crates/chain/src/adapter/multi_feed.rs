//! Adapter for multi-feed contracts (per-feed timestamps, partial updates).

use super::contracts::IMultiFeedAdapter;
use super::{simulate_then_read, AdapterKind, ChainAdapter, UpdateScope};
use crate::payload::encode_payload;
use crate::provider::ChainRpc;
use crate::signer::TxSubmitter;
use crate::types::{feed_id_to_bytes32, ContractData, ContractSnapshot, DeliveryCall, DispatchedTx};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use anyhow::{Context, Result};
use async_trait::async_trait;
use relayer_api::{FeedId, SignedPackageSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct MultiFeedAdapter {
    contract: Address,
    rpc: Arc<dyn ChainRpc>,
    submitter: Arc<dyn TxSubmitter>,
}

impl MultiFeedAdapter {
    pub fn new(contract: Address, rpc: Arc<dyn ChainRpc>, submitter: Arc<dyn TxSubmitter>) -> Self {
        Self {
            contract,
            rpc,
            submitter,
        }
    }

    fn encode_ids(feed_ids: &[FeedId]) -> Result<Vec<B256>> {
        feed_ids.iter().map(|id| feed_id_to_bytes32(id)).collect()
    }
}

#[async_trait]
impl ChainAdapter for MultiFeedAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::MultiFeed
    }

    fn contract_address(&self) -> Address {
        self.contract
    }

    fn update_scope(&self) -> UpdateScope {
        UpdateScope::PerFeed
    }

    #[instrument(skip(self, feed_ids), fields(feeds = feed_ids.len()))]
    async fn read_last_update_state(
        &self,
        feed_ids: &[FeedId],
        block_number: u64,
    ) -> Result<ContractData> {
        let call = IMultiFeedAdapter::getLastUpdateDetailsUnsafeForManyCall {
            dataFeedsIds: Self::encode_ids(feed_ids)?,
        };
        let out = self
            .rpc
            .call(self.contract, call.abi_encode().into(), block_number)
            .await
            .context("Failed to read last update details")?;
        let details =
            IMultiFeedAdapter::getLastUpdateDetailsUnsafeForManyCall::abi_decode_returns(&out, true)
                .context("Malformed last update details")?
                .detailsForFeeds;

        if details.len() < feed_ids.len() {
            warn!(
                requested = feed_ids.len(),
                returned = details.len(),
                missing = ?&feed_ids[details.len()..],
                "Contract returned fewer feeds than requested, dropping the rest"
            );
        }

        let data: ContractData = feed_ids
            .iter()
            .zip(details)
            .map(|(feed_id, d)| {
                let snapshot = ContractSnapshot {
                    last_data_package_timestamp_ms: d.dataTimestamp.saturating_to::<u64>(),
                    last_block_timestamp_ms: d
                        .blockTimestamp
                        .saturating_to::<u64>()
                        .saturating_mul(1000),
                    last_value: d.value,
                };
                (feed_id.clone(), snapshot)
            })
            .collect();

        debug!(feeds = data.len(), block_number = block_number, "Contract state read");
        Ok(data)
    }

    async fn get_unique_signer_threshold(&self, block_number: u64) -> Result<u8> {
        let call = IMultiFeedAdapter::getUniqueSignersThresholdCall {};
        let out = self
            .rpc
            .call(self.contract, call.abi_encode().into(), block_number)
            .await?;
        Ok(IMultiFeedAdapter::getUniqueSignersThresholdCall::abi_decode_returns(&out, true)?._0)
    }

    /// Feeds without packages are left out of the update; the contract would
    /// reject an id it receives no data for.
    fn build_update_calldata(
        &self,
        feed_ids: &[FeedId],
        packages: &SignedPackageSet,
        metadata_timestamp_ms: u64,
    ) -> Result<DeliveryCall> {
        let (covered, missing): (Vec<FeedId>, Vec<FeedId>) = feed_ids
            .iter()
            .cloned()
            .partition(|id| packages.contains_feed(id));
        if !missing.is_empty() {
            warn!(missing = ?missing, "Missing some feeds in the response, updating the rest");
        }

        let selected = packages.packages_for_feeds(&covered);
        if selected.is_empty() {
            anyhow::bail!("No packages available for feeds {:?}", feed_ids);
        }

        let mut data = IMultiFeedAdapter::updateDataFeedsValuesPartialCall {
            dataFeedsIdsArray: Self::encode_ids(&covered)?,
        }
        .abi_encode();
        data.extend_from_slice(&encode_payload(&selected, metadata_timestamp_ms)?);

        Ok(DeliveryCall::new(
            self.submitter.address(),
            self.contract,
            data.into(),
            covered,
        ))
    }

    async fn submit(&self, call: &DeliveryCall) -> Result<DispatchedTx> {
        self.submitter.submit(call).await
    }

    async fn simulate_update(
        &self,
        update: &Bytes,
        feed_ids: &[FeedId],
        block_number: u64,
    ) -> Result<Vec<U256>> {
        let read = IMultiFeedAdapter::getValuesForDataFeedsCall {
            requestedDataFeedIds: Self::encode_ids(feed_ids)?,
        }
        .abi_encode();
        let out = simulate_then_read(self.rpc.as_ref(), self.contract, update, read, block_number).await?;
        Ok(IMultiFeedAdapter::getValuesForDataFeedsCall::abi_decode_returns(&out, true)?._0)
    }
}
