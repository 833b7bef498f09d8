//! Transaction signer and sender for price updates.
//!
//! Transactions are signed locally and broadcast as raw bytes through the
//! [`ChainRpc`] stack, so the provider fallback and timeouts apply to sends too.
//! Sending returns as soon as a hash is known; inclusion is observed separately.

use crate::gas::{GasParams, GasStrategy, LegacyGasStrategy};
use crate::provider::ChainRpc;
use crate::types::{DeliveryCall, DispatchedTx};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Default gas limit for update transactions.
const DEFAULT_UPDATE_GAS_LIMIT: u64 = 1_000_000;

/// Signs and broadcasts update transactions on behalf of the relayer.
#[async_trait]
pub trait TxSubmitter: Send + Sync + Debug {
    /// Relayer address used as `from`.
    fn address(&self) -> Address;

    async fn submit(&self, call: &DeliveryCall) -> Result<DispatchedTx>;

    /// EIP-191 signature over `message`.
    async fn sign_message(&self, message: &[u8]) -> Result<Bytes>;
}

/// Locally tracked nonce.
pub struct NonceManager {
    current: AtomicU64,
}

impl NonceManager {
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_nonce),
        }
    }

    /// Get next nonce and increment counter.
    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Reset nonce to the chain value (after a failed send).
    pub fn reset(&self, chain_nonce: u64) {
        self.current.store(chain_nonce, Ordering::SeqCst);
    }
}

/// Transaction sender with a configurable gas strategy.
pub struct TransactionSender {
    rpc: Arc<dyn ChainRpc>,
    signer: PrivateKeySigner,
    wallet: EthereumWallet,
    address: Address,
    chain_id: u64,
    nonce_manager: NonceManager,
    gas_limit: u64,
    /// Applied to fetched fee data before every send
    gas_multiplier: f64,
    gas_strategy: Box<dyn GasStrategy>,
}

/// Builder for TransactionSender.
pub struct TransactionSenderBuilder {
    rpc: Arc<dyn ChainRpc>,
    chain_id: u64,
    gas_strategy: Option<Box<dyn GasStrategy>>,
    gas_limit: Option<u64>,
    gas_multiplier: f64,
}

impl TransactionSenderBuilder {
    pub fn new(rpc: Arc<dyn ChainRpc>, chain_id: u64) -> Self {
        Self {
            rpc,
            chain_id,
            gas_strategy: None,
            gas_limit: None,
            gas_multiplier: 1.0,
        }
    }

    pub fn gas_strategy(mut self, strategy: Box<dyn GasStrategy>) -> Self {
        self.gas_strategy = Some(strategy);
        self
    }

    pub fn gas_limit(mut self, limit: u64) -> Self {
        self.gas_limit = Some(limit);
        self
    }

    pub fn gas_multiplier(mut self, multiplier: f64) -> Self {
        self.gas_multiplier = multiplier;
        self
    }

    /// Build the sender, fetching the initial nonce from chain.
    pub async fn build(self, private_key: &str) -> Result<TransactionSender> {
        let key_str = private_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str.parse().context("Invalid private key")?;
        let signer = signer.with_chain_id(Some(self.chain_id));
        let address = signer.address();
        let wallet = EthereumWallet::from(signer.clone());

        let initial_nonce = self
            .rpc
            .transaction_count(address)
            .await
            .context("Failed to fetch initial nonce")?;

        let gas_strategy = self.gas_strategy.unwrap_or_else(|| {
            Box::new(LegacyGasStrategy::new(
                1_000_000_000,  // 1 gwei default
                10_000_000_000, // 10 gwei max
            ))
        });

        info!(
            address = %address,
            chain_id = self.chain_id,
            initial_nonce = initial_nonce,
            gas_strategy = gas_strategy.strategy_name(),
            gas_multiplier = self.gas_multiplier,
            "Transaction sender initialized"
        );

        Ok(TransactionSender {
            rpc: self.rpc,
            signer,
            wallet,
            address,
            chain_id: self.chain_id,
            nonce_manager: NonceManager::new(initial_nonce),
            gas_limit: self.gas_limit.unwrap_or(DEFAULT_UPDATE_GAS_LIMIT),
            gas_multiplier: self.gas_multiplier,
            gas_strategy,
        })
    }
}

impl TransactionSender {
    pub fn gas_strategy_name(&self) -> &'static str {
        self.gas_strategy.strategy_name()
    }

    pub fn current_nonce(&self) -> u64 {
        self.nonce_manager.current()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Current fee data scaled by the configured multiplier.
    pub async fn gas_params(&self) -> Result<GasParams> {
        Ok(self
            .gas_strategy
            .fetch_params(self.rpc.as_ref())
            .await?
            .scaled(self.gas_multiplier))
    }

    /// Re-read the nonce from chain (call after a failed send).
    pub async fn sync_nonce(&self) {
        match self.rpc.transaction_count(self.address).await {
            Ok(chain_nonce) => {
                self.nonce_manager.reset(chain_nonce);
                debug!(nonce = chain_nonce, "Nonce synced from chain");
            }
            Err(e) => {
                warn!(error = %e, "Failed to sync nonce from chain");
            }
        }
    }

    async fn sign_and_send(&self, call: &DeliveryCall) -> Result<DispatchedTx> {
        let total_start = Instant::now();
        let nonce = self.nonce_manager.next();
        let gas = self.gas_params().await?;

        let mut tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(call.to)
            .with_input(call.data.clone())
            .with_value(call.value.unwrap_or_default())
            .with_nonce(nonce)
            .with_gas_limit(self.gas_limit)
            .with_chain_id(self.chain_id);
        self.gas_strategy.apply_gas(&mut tx, &gas);

        let envelope = tx
            .build(&self.wallet)
            .await
            .context("Failed to sign update transaction")?;
        let raw = Bytes::from(envelope.encoded_2718());

        let hash = self.rpc.send_raw_transaction(raw).await?;

        debug!(
            tx_hash = %hash,
            nonce = nonce,
            feeds = call.feed_ids.len(),
            total_ms = total_start.elapsed().as_millis(),
            "Transaction broadcast"
        );

        Ok(DispatchedTx {
            hash,
            nonce,
            gas_limit: self.gas_limit,
            gas,
        })
    }
}

#[async_trait]
impl TxSubmitter for TransactionSender {
    fn address(&self) -> Address {
        self.address
    }

    async fn submit(&self, call: &DeliveryCall) -> Result<DispatchedTx> {
        match self.sign_and_send(call).await {
            Ok(dispatched) => Ok(dispatched),
            Err(e) => {
                warn!(error = %e, "Send failed, syncing nonce");
                self.sync_nonce().await;
                Err(e)
            }
        }
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Bytes> {
        let signature = self.signer.sign_message(message).await?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }
}

impl Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("gas_strategy", &self.gas_strategy.strategy_name())
            .finish_non_exhaustive()
    }
}
