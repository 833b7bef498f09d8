//! Chain-facing value types.

use alloy::primitives::{Address, Bytes, B256, U256};
use anyhow::Result;
use relayer_api::FeedId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::gas::GasParams;

/// Last on-chain state of one feed, captured once per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContractSnapshot {
    pub last_data_package_timestamp_ms: u64,
    pub last_block_timestamp_ms: u64,
    /// Raw stored value, scaled by the feed's decimals
    pub last_value: U256,
}

/// Snapshots of every feed the adapter could read.
pub type ContractData = HashMap<FeedId, ContractSnapshot>;

/// Transaction to deliver. Built by an adapter, never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryCall {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: Option<U256>,
    /// Feeds whose values this call writes
    pub feed_ids: Vec<FeedId>,
    pub built_at: Instant,
}

impl DeliveryCall {
    pub fn new(from: Address, to: Address, data: Bytes, feed_ids: Vec<FeedId>) -> Self {
        Self {
            from,
            to,
            data,
            value: None,
            feed_ids,
            built_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }

    /// Whether the call was built longer ago than `budget`.
    pub fn is_stale(&self, budget: Duration) -> bool {
        self.age() > budget
    }
}

/// Transaction handed to the network; inclusion is not yet known.
#[derive(Debug, Clone)]
pub struct DispatchedTx {
    pub hash: B256,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas: GasParams,
}

/// Receipt fields the relayer logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceiptSummary {
    pub hash: B256,
    pub success: bool,
    pub block_number: Option<u64>,
    pub transaction_index: Option<u64>,
    pub gas_used: u64,
    pub effective_gas_price: u128,
}

impl TxReceiptSummary {
    pub fn status_label(&self) -> &'static str {
        if self.success {
            "SUCCESS"
        } else {
            "FAILURE"
        }
    }
}

/// Encode a feed id as a right-padded `bytes32`.
pub fn feed_id_to_bytes32(feed_id: &str) -> Result<B256> {
    let bytes = feed_id.as_bytes();
    if bytes.len() > 31 {
        anyhow::bail!("Feed id '{}' is longer than 31 bytes", feed_id);
    }
    let mut out = [0u8; 32];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(B256::from(out))
}

/// Decode a right-padded `bytes32` back into a feed id.
pub fn bytes32_to_feed_id(value: &B256) -> String {
    let end = value.iter().position(|b| *b == 0).unwrap_or(32);
    String::from_utf8_lossy(&value[..end]).into_owned()
}
