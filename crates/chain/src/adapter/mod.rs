//! Chain adapters.
//!
//! An adapter wraps one on-chain contract family and is the only place that
//! knows its ABI. The set of families is closed ([`AdapterKind`]) and resolved
//! once at startup by [`create_adapter`].

mod contracts;
mod multi_feed;
mod price_feeds;

pub use multi_feed::MultiFeedAdapter;
pub use price_feeds::PriceFeedsAdapter;

use crate::provider::ChainRpc;
use crate::signer::TxSubmitter;
use crate::types::{ContractData, DeliveryCall, DispatchedTx};
use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use anyhow::{bail, Context, Result};
use contracts::{IMulticall3, MULTICALL3};
use async_trait::async_trait;
use relayer_api::{FeedId, SignedPackageSet};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::Arc;

/// Supported adapter contract families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    /// All feeds share one timestamp and are written together
    PriceFeeds,
    /// Each feed carries its own timestamp and can be written alone
    MultiFeed,
}

impl FromStr for AdapterKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "price-feeds" => Ok(Self::PriceFeeds),
            "multi-feed" => Ok(Self::MultiFeed),
            other => anyhow::bail!("Unsupported adapter type: {}", other),
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PriceFeeds => f.write_str("price-feeds"),
            Self::MultiFeed => f.write_str("multi-feed"),
        }
    }
}

/// How much of the feed set one update transaction writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateScope {
    /// Any subset; auctions run one leg per feed
    PerFeed,
    /// Always every feed; auctions run a single batch leg
    AllFeeds,
}

/// Operations the relayer core needs from a contract family.
#[async_trait]
pub trait ChainAdapter: Send + Sync + Debug {
    fn kind(&self) -> AdapterKind;

    fn contract_address(&self) -> Address;

    fn update_scope(&self) -> UpdateScope;

    /// Last stored state of `feed_ids` at `block_number`. Feeds the contract
    /// does not report are absent from the result.
    async fn read_last_update_state(
        &self,
        feed_ids: &[FeedId],
        block_number: u64,
    ) -> Result<ContractData>;

    async fn get_unique_signer_threshold(&self, block_number: u64) -> Result<u8>;

    /// Encode an update of `feed_ids` carrying `packages`.
    fn build_update_calldata(
        &self,
        feed_ids: &[FeedId],
        packages: &SignedPackageSet,
        metadata_timestamp_ms: u64,
    ) -> Result<DeliveryCall>;

    async fn submit(&self, call: &DeliveryCall) -> Result<DispatchedTx>;

    /// Values of `feed_ids` right after `update` executes on top of
    /// `block_number`, in `feed_ids` order. Nothing is sent.
    async fn simulate_update(
        &self,
        update: &Bytes,
        feed_ids: &[FeedId],
        block_number: u64,
    ) -> Result<Vec<U256>>;
}

/// Run `update` and then `read` against `contract` in one Multicall3
/// `eth_call`, returning what `read` returned.
async fn simulate_then_read(
    rpc: &dyn ChainRpc,
    contract: Address,
    update: &Bytes,
    read: Vec<u8>,
    block_number: u64,
) -> Result<Bytes> {
    let call = IMulticall3::aggregate3Call {
        calls: vec![
            IMulticall3::Call3 {
                target: contract,
                allowFailure: false,
                callData: update.clone(),
            },
            IMulticall3::Call3 {
                target: contract,
                allowFailure: false,
                callData: read.into(),
            },
        ],
    };
    let out = rpc
        .call(MULTICALL3, call.abi_encode().into(), block_number)
        .await
        .context("Update simulation failed")?;
    let mut results = IMulticall3::aggregate3Call::abi_decode_returns(&out, true)
        .context("Malformed simulation result")?
        .returnData;

    match results.pop() {
        Some(read) if read.success && results.len() == 1 => Ok(read.returnData),
        _ => bail!("Simulated update returned no feed values"),
    }
}

/// Build the adapter for `kind`.
pub fn create_adapter(
    kind: AdapterKind,
    contract: Address,
    rpc: Arc<dyn ChainRpc>,
    submitter: Arc<dyn TxSubmitter>,
) -> Arc<dyn ChainAdapter> {
    match kind {
        AdapterKind::PriceFeeds => Arc::new(PriceFeedsAdapter::new(contract, rpc, submitter)),
        AdapterKind::MultiFeed => Arc::new(MultiFeedAdapter::new(contract, rpc, submitter)),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_kind_parsing() {
        assert_eq!("price-feeds".parse::<AdapterKind>().unwrap(), AdapterKind::PriceFeeds);
        assert_eq!("Multi-Feed".parse::<AdapterKind>().unwrap(), AdapterKind::MultiFeed);
        assert!("mento".parse::<AdapterKind>().is_err());
        assert_eq!(AdapterKind::MultiFeed.to_string(), "multi-feed");
    }

    #[test]
    fn test_create_adapter_dispatches_on_kind() {
        let rpc = test_support::CallRpc::new(|_| Ok(Default::default()));
        let submitter = Arc::new(test_support::NoopSubmitter::default());
        let adapter = create_adapter(AdapterKind::PriceFeeds, Address::ZERO, rpc.clone(), submitter.clone());
        assert_eq!(adapter.kind(), AdapterKind::PriceFeeds);
        assert_eq!(adapter.update_scope(), UpdateScope::AllFeeds);

        let adapter = create_adapter(AdapterKind::MultiFeed, Address::ZERO, rpc, submitter);
        assert_eq!(adapter.update_scope(), UpdateScope::PerFeed);
    }

    #[tokio::test]
    async fn test_simulation_returns_the_read_after_the_update() {
        let contract = Address::repeat_byte(0x33);
        let rpc = test_support::CallRpc::new(move |data| {
            assert_eq!(&data[..4], IMulticall3::aggregate3Call::SELECTOR.as_slice());
            let calls = IMulticall3::aggregate3Call::abi_decode(data, true)?.calls;
            assert_eq!(calls.len(), 2);
            assert!(calls.iter().all(|c| c.target == contract && !c.allowFailure));
            assert_eq!(calls[0].callData, Bytes::from_static(b"update"));
            Ok(Bytes::from(IMulticall3::aggregate3Call::abi_encode_returns(&(vec![
                IMulticall3::Result {
                    success: true,
                    returnData: Bytes::new(),
                },
                IMulticall3::Result {
                    success: true,
                    returnData: Bytes::from_static(b"values"),
                },
            ],))))
        });

        let out = simulate_then_read(
            rpc.as_ref(),
            contract,
            &Bytes::from_static(b"update"),
            b"read".to_vec(),
            42,
        )
        .await
        .unwrap();
        assert_eq!(out, Bytes::from_static(b"values"));
        assert_eq!(rpc.calls.lock()[0].1, 42);
    }

    #[tokio::test]
    async fn test_simulation_fails_without_values() {
        let rpc = test_support::CallRpc::new(|_| {
            Ok(Bytes::from(IMulticall3::aggregate3Call::abi_encode_returns(&(vec![
                IMulticall3::Result {
                    success: true,
                    returnData: Bytes::new(),
                },
            ],))))
        });
        assert!(simulate_then_read(rpc.as_ref(), Address::ZERO, &Bytes::new(), vec![], 1)
            .await
            .is_err());
    }
}
