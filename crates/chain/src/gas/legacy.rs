//! Legacy gas pricing strategy (pre-EIP-1559).

use super::{GasParams, GasStrategy};
use crate::provider::ChainRpc;
use alloy::network::TransactionBuilder;
use alloy::rpc::types::TransactionRequest;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Legacy gas pricing strategy.
///
/// Uses the node's `eth_gasPrice`, capped at `max_gas_price`. The last price
/// seen is cached and reused when the node does not answer.
#[derive(Debug)]
pub struct LegacyGasStrategy {
    /// Default gas price in wei.
    default_gas_price: u128,
    /// Maximum gas price in wei.
    max_gas_price: u128,
    /// Last known gas price.
    cached_gas_price: AtomicU64,
}

impl LegacyGasStrategy {
    /// Create a new Legacy gas strategy.
    ///
    /// # Arguments
    /// * `default_gas_price` - Gas price in wei used until the node answers
    /// * `max_gas_price` - Maximum allowed gas price in wei
    pub fn new(default_gas_price: u128, max_gas_price: u128) -> Self {
        Self {
            default_gas_price,
            max_gas_price,
            cached_gas_price: AtomicU64::new(default_gas_price.min(max_gas_price) as u64),
        }
    }

    /// Get the cached gas price.
    pub fn cached_gas_price(&self) -> u128 {
        self.cached_gas_price.load(Ordering::Relaxed) as u128
    }

    /// Update the cached gas price (capped at the maximum).
    pub fn update_cache(&self, gas_price: u128) {
        let capped = gas_price.min(self.max_gas_price);
        self.cached_gas_price.store(capped as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl GasStrategy for LegacyGasStrategy {
    async fn fetch_params(&self, rpc: &dyn ChainRpc) -> Result<GasParams> {
        let gas_price = match rpc.gas_price().await {
            Ok(price) => {
                self.update_cache(price);
                self.cached_gas_price()
            }
            Err(e) => {
                debug!(error = %e, default = self.default_gas_price, "Gas price unavailable, using cache");
                self.cached_gas_price()
            }
        };

        Ok(GasParams::Legacy { gas_price })
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        match params {
            GasParams::Legacy { gas_price } => {
                tx.set_gas_price(*gas_price);
            }
            GasParams::Eip1559 { max_fee_per_gas, .. } => {
                // Fallback: use max_fee as legacy gas price
                tx.set_gas_price(*max_fee_per_gas);
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        "Legacy"
    }
}
