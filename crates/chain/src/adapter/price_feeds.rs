//! Adapter for price-feeds contracts.
//!
//! Every feed shares the timestamp of the latest update, and an update must
//! write all feeds at once under a single proposed timestamp.

use super::contracts::IPriceFeedsAdapter;
use super::{simulate_then_read, AdapterKind, ChainAdapter, UpdateScope};
use crate::payload::encode_payload;
use crate::provider::ChainRpc;
use crate::signer::TxSubmitter;
use crate::types::{feed_id_to_bytes32, ContractData, ContractSnapshot, DeliveryCall, DispatchedTx};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use relayer_api::{FeedId, SignedPackageSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct PriceFeedsAdapter {
    contract: Address,
    rpc: Arc<dyn ChainRpc>,
    submitter: Arc<dyn TxSubmitter>,
}

impl PriceFeedsAdapter {
    pub fn new(contract: Address, rpc: Arc<dyn ChainRpc>, submitter: Arc<dyn TxSubmitter>) -> Self {
        Self {
            contract,
            rpc,
            submitter,
        }
    }

    /// `(data timestamp ms, block timestamp ms)` of the latest update.
    async fn latest_timestamps(&self, block_number: u64) -> Result<(u64, u64)> {
        let call = IPriceFeedsAdapter::getTimestampsFromLatestUpdateCall {};
        let out = self
            .rpc
            .call(self.contract, call.abi_encode().into(), block_number)
            .await
            .context("Failed to read latest update timestamps")?;
        let ret = IPriceFeedsAdapter::getTimestampsFromLatestUpdateCall::abi_decode_returns(&out, true)?;
        let data_ts = u64::try_from(ret.dataTimestamp).unwrap_or(u64::MAX);
        let block_ts = u64::try_from(ret.blockTimestamp)
            .unwrap_or(u64::MAX)
            .saturating_mul(1000);
        Ok((data_ts, block_ts))
    }

    async fn latest_values(&self, ids: Vec<B256>, block_number: u64) -> Result<Vec<U256>> {
        let call = IPriceFeedsAdapter::getValuesForDataFeedsCall {
            requestedDataFeedIds: ids,
        };
        let out = self
            .rpc
            .call(self.contract, call.abi_encode().into(), block_number)
            .await
            .context("Failed to read feed values")?;
        Ok(IPriceFeedsAdapter::getValuesForDataFeedsCall::abi_decode_returns(&out, true)?._0)
    }
}

#[async_trait]
impl ChainAdapter for PriceFeedsAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::PriceFeeds
    }

    fn contract_address(&self) -> Address {
        self.contract
    }

    fn update_scope(&self) -> UpdateScope {
        UpdateScope::AllFeeds
    }

    #[instrument(skip(self, feed_ids), fields(feeds = feed_ids.len()))]
    async fn read_last_update_state(
        &self,
        feed_ids: &[FeedId],
        block_number: u64,
    ) -> Result<ContractData> {
        let ids = feed_ids
            .iter()
            .map(|id| feed_id_to_bytes32(id))
            .collect::<Result<Vec<_>>>()?;

        let ((data_ts, block_ts), values) = tokio::try_join!(
            self.latest_timestamps(block_number),
            self.latest_values(ids, block_number)
        )?;

        if values.len() < feed_ids.len() {
            warn!(
                requested = feed_ids.len(),
                returned = values.len(),
                "Contract returned fewer values than requested, dropping the rest"
            );
        }

        let data: ContractData = feed_ids
            .iter()
            .zip(values)
            .map(|(feed_id, value)| {
                (
                    feed_id.clone(),
                    ContractSnapshot {
                        last_data_package_timestamp_ms: data_ts,
                        last_block_timestamp_ms: block_ts,
                        last_value: value,
                    },
                )
            })
            .collect();

        debug!(
            feeds = data.len(),
            data_timestamp = data_ts,
            block_number = block_number,
            "Contract state read"
        );
        Ok(data)
    }

    async fn get_unique_signer_threshold(&self, block_number: u64) -> Result<u8> {
        let call = IPriceFeedsAdapter::getUniqueSignersThresholdCall {};
        let out = self
            .rpc
            .call(self.contract, call.abi_encode().into(), block_number)
            .await?;
        Ok(IPriceFeedsAdapter::getUniqueSignersThresholdCall::abi_decode_returns(&out, true)?._0)
    }

    /// `feed_ids` must be every feed of the contract and each needs packages.
    fn build_update_calldata(
        &self,
        feed_ids: &[FeedId],
        packages: &SignedPackageSet,
        metadata_timestamp_ms: u64,
    ) -> Result<DeliveryCall> {
        let missing: Vec<&FeedId> = feed_ids.iter().filter(|id| !packages.contains_feed(id)).collect();
        if !missing.is_empty() {
            bail!("Cannot update all feeds, no packages for {:?}", missing);
        }

        let selected = packages.packages_for_feeds(feed_ids);
        let Some(proposed) = selected.iter().map(|p| p.timestamp_milliseconds).min() else {
            bail!("No packages available for feeds {:?}", feed_ids);
        };

        let mut data = IPriceFeedsAdapter::updateDataFeedsValuesCall {
            proposedTimestamp: U256::from(proposed),
        }
        .abi_encode();
        data.extend_from_slice(&encode_payload(&selected, metadata_timestamp_ms)?);

        Ok(DeliveryCall::new(
            self.submitter.address(),
            self.contract,
            data.into(),
            feed_ids.to_vec(),
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
        let ids = feed_ids
            .iter()
            .map(|id| feed_id_to_bytes32(id))
            .collect::<Result<Vec<_>>>()?;
        let read = IPriceFeedsAdapter::getValuesForDataFeedsCall {
            requestedDataFeedIds: ids,
        }
        .abi_encode();
        let out = simulate_then_read(self.rpc.as_ref(), self.contract, update, read, block_number).await?;
        Ok(IPriceFeedsAdapter::getValuesForDataFeedsCall::abi_decode_returns(&out, true)?._0)
    }
}
