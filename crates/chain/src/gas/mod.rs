//! Gas strategy abstraction.
//!
//! Strategies read current fee data through [`ChainRpc`] and apply it to
//! update transactions. Both Legacy and EIP-1559 transaction types are supported.
//!
//! # Example
//!
//! ```rust,ignore
//! use relayer_chain::gas::create_gas_strategy;
//!
//! let strategy = create_gas_strategy("Eip1559", 30.0, 500.0, Some(2.0));
//! let params = strategy.fetch_params(rpc.as_ref()).await?.scaled(1.125);
//! ```

mod eip1559;
mod legacy;

pub use eip1559::Eip1559GasStrategy;
pub use legacy::LegacyGasStrategy;

use crate::provider::ChainRpc;
use alloy::rpc::types::TransactionRequest;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// Gas parameters fetched from the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum GasParams {
    /// Legacy gas pricing (pre-EIP-1559).
    Legacy {
        /// Gas price in wei.
        gas_price: u128,
    },
    /// EIP-1559 gas pricing.
    Eip1559 {
        /// Maximum fee per gas in wei.
        max_fee_per_gas: u128,
        /// Maximum priority fee per gas in wei.
        max_priority_fee_per_gas: u128,
        /// Base fee of the latest block.
        base_fee: u128,
    },
}

impl GasParams {
    /// Highest price per gas the transaction may pay.
    pub fn effective_gas_price(&self) -> u128 {
        match self {
            GasParams::Legacy { gas_price } => *gas_price,
            GasParams::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }

    /// Scale the offered prices by `multiplier` (base fee is left untouched).
    pub fn scaled(&self, multiplier: f64) -> Self {
        let scale = |v: u128| ((v as f64) * multiplier) as u128;
        match self {
            GasParams::Legacy { gas_price } => GasParams::Legacy {
                gas_price: scale(*gas_price),
            },
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                base_fee,
            } => GasParams::Eip1559 {
                max_fee_per_gas: scale(*max_fee_per_gas),
                max_priority_fee_per_gas: scale(*max_priority_fee_per_gas),
                base_fee: *base_fee,
            },
        }
    }

    /// `(gas_price, max_fee_per_gas, max_priority_fee_per_gas)` for logging.
    pub fn log_fields(&self) -> (Option<u128>, Option<u128>, Option<u128>) {
        match self {
            GasParams::Legacy { gas_price } => (Some(*gas_price), None, None),
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                ..
            } => (None, Some(*max_fee_per_gas), Some(*max_priority_fee_per_gas)),
        }
    }
}

/// Trait for gas pricing strategies.
#[async_trait]
pub trait GasStrategy: Send + Sync + Debug {
    /// Fetch current gas parameters.
    async fn fetch_params(&self, rpc: &dyn ChainRpc) -> Result<GasParams>;

    /// Apply gas parameters to a transaction request in place.
    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams);

    /// Get the strategy name for logging.
    fn strategy_name(&self) -> &'static str;
}

/// Create a gas strategy from chain configuration.
///
/// # Arguments
/// * `pricing_model` - "Legacy" or "Eip1559"
/// * `default_gas_price_gwei` - Fallback gas price in gwei when the node cannot answer
/// * `max_gas_price_gwei` - Cap on the offered price in gwei
/// * `priority_fee_gwei` - Fallback priority fee in gwei (EIP-1559)
pub fn create_gas_strategy(
    pricing_model: &str,
    default_gas_price_gwei: f64,
    max_gas_price_gwei: f64,
    priority_fee_gwei: Option<f64>,
) -> Box<dyn GasStrategy> {
    match pricing_model.to_lowercase().as_str() {
        "eip1559" | "eip-1559" => {
            let priority_fee = priority_fee_gwei.unwrap_or(2.0);
            Box::new(
                Eip1559GasStrategy::new((priority_fee * 1e9) as u128, 2.0)
                    .with_max_fee_cap((max_gas_price_gwei * 1e9) as u128),
            )
        }
        _ => Box::new(LegacyGasStrategy::new(
            (default_gas_price_gwei * 1e9) as u128,
            (max_gas_price_gwei * 1e9) as u128,
        )),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::types::TxReceiptSummary;
    use alloy::primitives::{Address, Bytes, B256};

    /// RPC double answering fee queries with fixed values.
    #[derive(Debug)]
    pub struct FeeRpc {
        pub gas_price: Option<u128>,
        pub priority_fee: Option<u128>,
        pub base_fee: Option<u128>,
    }

    #[async_trait]
    impl ChainRpc for FeeRpc {
        async fn block_number(&self) -> Result<u64> {
            Ok(1)
        }
        async fn gas_price(&self) -> Result<u128> {
            self.gas_price.ok_or_else(|| anyhow::anyhow!("no gas price"))
        }
        async fn max_priority_fee_per_gas(&self) -> Result<u128> {
            self.priority_fee.ok_or_else(|| anyhow::anyhow!("no priority fee"))
        }
        async fn base_fee_per_gas(&self) -> Result<Option<u128>> {
            Ok(self.base_fee)
        }
        async fn transaction_count(&self, _address: Address) -> Result<u64> {
            Ok(0)
        }
        async fn call(&self, _to: Address, _data: Bytes, _block: u64) -> Result<Bytes> {
            Ok(Bytes::new())
        }
        async fn send_raw_transaction(&self, _raw: Bytes) -> Result<B256> {
            Ok(B256::ZERO)
        }
        async fn transaction_receipt(&self, _hash: B256) -> Result<Option<TxReceiptSummary>> {
            Ok(None)
        }
    }
}
