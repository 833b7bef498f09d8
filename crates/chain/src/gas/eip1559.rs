//! EIP-1559 gas pricing strategy.

use super::{GasParams, GasStrategy};
use crate::provider::ChainRpc;
use alloy::network::TransactionBuilder;
use alloy::rpc::types::TransactionRequest;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// Base fee assumed when the latest block does not report one.
const FALLBACK_BASE_FEE: u128 = 30_000_000_000;

/// EIP-1559 gas pricing strategy.
///
/// `max_fee = base_fee * multiplier + priority_fee`, capped at `max_fee_cap`.
#[derive(Debug)]
pub struct Eip1559GasStrategy {
    /// Priority fee used when the node does not suggest one.
    default_priority_fee: u128,
    /// Multiplier for max_fee relative to base_fee.
    max_fee_multiplier: f64,
    /// Maximum allowed max_fee_per_gas in wei.
    max_fee_cap: u128,
    cached_base_fee: AtomicU64,
    cached_priority_fee: AtomicU64,
}

impl Eip1559GasStrategy {
    pub fn new(default_priority_fee: u128, max_fee_multiplier: f64) -> Self {
        Self {
            default_priority_fee,
            max_fee_multiplier,
            max_fee_cap: 500_000_000_000, // 500 gwei default cap
            cached_base_fee: AtomicU64::new(FALLBACK_BASE_FEE as u64),
            cached_priority_fee: AtomicU64::new(default_priority_fee as u64),
        }
    }

    /// Create with a custom max fee cap.
    pub fn with_max_fee_cap(mut self, cap: u128) -> Self {
        self.max_fee_cap = cap;
        self
    }

    pub fn cached_base_fee(&self) -> u128 {
        self.cached_base_fee.load(Ordering::Relaxed) as u128
    }

    pub fn cached_priority_fee(&self) -> u128 {
        self.cached_priority_fee.load(Ordering::Relaxed) as u128
    }

    fn update_cache(&self, base_fee: u128, priority_fee: u128) {
        self.cached_base_fee.store(base_fee as u64, Ordering::Relaxed);
        self.cached_priority_fee.store(priority_fee as u64, Ordering::Relaxed);
    }

    fn calculate_max_fee(&self, base_fee: u128, priority_fee: u128) -> u128 {
        let max_fee = ((base_fee as f64) * self.max_fee_multiplier) as u128 + priority_fee;
        max_fee.min(self.max_fee_cap)
    }
}

#[async_trait]
impl GasStrategy for Eip1559GasStrategy {
    async fn fetch_params(&self, rpc: &dyn ChainRpc) -> Result<GasParams> {
        let (base_fee, priority_fee) =
            tokio::join!(rpc.base_fee_per_gas(), rpc.max_priority_fee_per_gas());

        let base_fee = match base_fee {
            Ok(Some(fee)) => fee,
            _ => self.cached_base_fee(),
        };
        let priority_fee = priority_fee.unwrap_or(self.default_priority_fee);
        self.update_cache(base_fee, priority_fee);

        Ok(GasParams::Eip1559 {
            max_fee_per_gas: self.calculate_max_fee(base_fee, priority_fee),
            max_priority_fee_per_gas: priority_fee,
            base_fee,
        })
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        match params {
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                ..
            } => {
                tx.set_max_fee_per_gas(*max_fee_per_gas);
                tx.set_max_priority_fee_per_gas(*max_priority_fee_per_gas);
            }
            GasParams::Legacy { gas_price } => {
                tx.set_max_fee_per_gas(*gas_price);
                tx.set_max_priority_fee_per_gas(self.default_priority_fee.min(*gas_price));
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        "EIP-1559"
    }
}
