//! Relayer chain interaction layer.
//!
//! This crate provides:
//! - The RPC provider stack (per-provider timeouts, ordered fallback, tracing)
//! - Adapter contract bindings for price-feeds and multi-feed contracts
//! - Signed package payload encoding
//! - Transaction signing and sending
//! - Gas strategy abstraction (Legacy + EIP-1559)
//!
//! Every chain read is pinned to an explicit block number so that one
//! relayer iteration observes a single consistent chain state.

pub mod adapter;
pub mod gas;
pub mod payload;
mod provider;
mod signer;
mod types;

pub use adapter::{
    create_adapter, AdapterKind, ChainAdapter, MultiFeedAdapter, PriceFeedsAdapter, UpdateScope,
};
pub use gas::{create_gas_strategy, GasParams, GasStrategy};
pub use provider::{
    build_rpc_stack, decode_signed_transaction, wait_for_receipt, ChainRpc, DecodedTx,
    FallbackRpc, HttpRpc, TracingRpc,
};
pub use signer::{NonceManager, TransactionSender, TransactionSenderBuilder, TxSubmitter};
pub use types::{
    bytes32_to_feed_id, feed_id_to_bytes32, ContractData, ContractSnapshot, DeliveryCall,
    DispatchedTx, TxReceiptSummary,
};
