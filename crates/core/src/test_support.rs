//! In-memory doubles for the relayer's collaborators.

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use relayer_api::{
    AuctionClient, AuctionRequest, DataPoint, FeedId, HealthMonitor, PackageSource,
    PackagesRequest, SignedDataPackage, SignedPackageSet,
};
use relayer_chain::{
    AdapterKind, ChainAdapter, ChainRpc, ContractData, ContractSnapshot, DeliveryCall,
    DispatchedTx, GasParams, TxReceiptSummary, TxSubmitter, UpdateScope,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const ADAPTER: Address = Address::repeat_byte(0xad);

pub fn package_set(feeds: &[(&str, f64)], ts: u64) -> SignedPackageSet {
    let mut set = SignedPackageSet::new();
    for (feed, value) in feeds {
        set.insert(
            *feed,
            vec![SignedDataPackage {
                data_package_id: feed.to_string(),
                timestamp_milliseconds: ts,
                signer_address: Address::repeat_byte(1),
                data_points: vec![DataPoint::new(*feed, *value)],
                signature: Bytes::from(vec![9u8; 65]),
            }],
        );
    }
    set
}

/// Snapshot storing `value` with 8 decimals.
pub fn snapshot(last_data_package_ts: u64, last_block_ts: u64, value: f64) -> ContractSnapshot {
    ContractSnapshot {
        last_data_package_timestamp_ms: last_data_package_ts,
        last_block_timestamp_ms: last_block_ts,
        last_value: U256::from((value * 1e8).round() as u128),
    }
}

/// Signed EIP-1559 transaction to `to`, returned with its hash.
pub async fn signed_tx(to: Address, max_fee_per_gas: u128) -> (B256, Bytes) {
    let wallet = EthereumWallet::from(PrivateKeySigner::random());
    let envelope = TransactionRequest::default()
        .with_to(to)
        .with_input(Bytes::from_static(b"update"))
        .with_nonce(0)
        .with_chain_id(31337)
        .with_gas_limit(100_000)
        .with_max_fee_per_gas(max_fee_per_gas)
        .with_max_priority_fee_per_gas(1)
        .build(&wallet)
        .await
        .unwrap();
    (*envelope.tx_hash(), Bytes::from(envelope.encoded_2718()))
}

pub fn receipt(hash: B256, success: bool) -> TxReceiptSummary {
    TxReceiptSummary {
        hash,
        success,
        block_number: Some(100),
        transaction_index: Some(0),
        gas_used: 50_000,
        effective_gas_price: 1,
    }
}

#[derive(Debug)]
pub struct MockPackageSource {
    packages: Mutex<Option<SignedPackageSet>>,
    pub requests: Mutex<Vec<PackagesRequest>>,
}

impl MockPackageSource {
    pub fn new(packages: SignedPackageSet) -> Arc<Self> {
        Arc::new(Self {
            packages: Mutex::new(Some(packages)),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            packages: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set(&self, packages: SignedPackageSet) {
        *self.packages.lock() = Some(packages);
    }

    pub fn make_unavailable(&self) {
        *self.packages.lock() = None;
    }
}

#[async_trait]
impl PackageSource for MockPackageSource {
    async fn request_packages(&self, request: &PackagesRequest) -> Result<SignedPackageSet> {
        self.requests.lock().push(request.clone());
        self.packages
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("gateway unavailable"))
    }
}

#[derive(Debug)]
pub struct MockAdapter {
    pub scope: UpdateScope,
    pub contract_data: Mutex<ContractData>,
    pub threshold: u8,
    /// Number of upcoming `submit` calls that fail
    pub submit_failures: AtomicU32,
    pub submitted: Mutex<Vec<DeliveryCall>>,
    pub built: Mutex<Vec<Vec<FeedId>>>,
    pub reads: AtomicUsize,
    /// Values a simulated update writes; feeds not listed get 1.0
    pub simulated: Mutex<HashMap<FeedId, f64>>,
    pub simulations: Mutex<Vec<(Vec<FeedId>, u64)>>,
}

impl MockAdapter {
    pub fn new(scope: UpdateScope, contract_data: ContractData) -> Arc<Self> {
        Arc::new(Self {
            scope,
            contract_data: Mutex::new(contract_data),
            threshold: 1,
            submit_failures: AtomicU32::new(0),
            submitted: Mutex::new(Vec::new()),
            built: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            simulated: Mutex::new(HashMap::new()),
            simulations: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_next_submits(&self, n: u32) {
        self.submit_failures.store(n, Ordering::SeqCst);
    }

    pub fn call(&self, feed_ids: &[&str]) -> DeliveryCall {
        DeliveryCall::new(
            Address::repeat_byte(0xaa),
            ADAPTER,
            Bytes::from(feed_ids.join(",").into_bytes()),
            feed_ids.iter().map(|f| f.to_string()).collect(),
        )
    }
}

#[async_trait]
impl ChainAdapter for MockAdapter {
    fn kind(&self) -> AdapterKind {
        match self.scope {
            UpdateScope::PerFeed => AdapterKind::MultiFeed,
            UpdateScope::AllFeeds => AdapterKind::PriceFeeds,
        }
    }

    fn contract_address(&self) -> Address {
        ADAPTER
    }

    fn update_scope(&self) -> UpdateScope {
        self.scope
    }

    async fn read_last_update_state(
        &self,
        feed_ids: &[FeedId],
        _block_number: u64,
    ) -> Result<ContractData> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let data = self.contract_data.lock();
        Ok(feed_ids
            .iter()
            .filter_map(|f| data.get(f).map(|s| (f.clone(), *s)))
            .collect())
    }

    async fn get_unique_signer_threshold(&self, _block_number: u64) -> Result<u8> {
        Ok(self.threshold)
    }

    fn build_update_calldata(
        &self,
        feed_ids: &[FeedId],
        packages: &SignedPackageSet,
        _metadata_timestamp_ms: u64,
    ) -> Result<DeliveryCall> {
        if let Some(missing) = feed_ids.iter().find(|f| !packages.contains_feed(f)) {
            bail!("No packages for {}", missing);
        }
        self.built.lock().push(feed_ids.to_vec());
        let ids: Vec<&str> = feed_ids.iter().map(String::as_str).collect();
        Ok(self.call(&ids))
    }

    async fn submit(&self, call: &DeliveryCall) -> Result<DispatchedTx> {
        let failing = self
            .submit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("nonce too low");
        }
        let mut submitted = self.submitted.lock();
        submitted.push(call.clone());
        Ok(DispatchedTx {
            hash: B256::with_last_byte(submitted.len() as u8),
            nonce: submitted.len() as u64,
            gas_limit: 1_000_000,
            gas: GasParams::Eip1559 {
                max_fee_per_gas: 20,
                max_priority_fee_per_gas: 2,
                base_fee: 9,
            },
        })
    }

    async fn simulate_update(
        &self,
        _update: &Bytes,
        feed_ids: &[FeedId],
        block_number: u64,
    ) -> Result<Vec<U256>> {
        self.simulations.lock().push((feed_ids.to_vec(), block_number));
        let simulated = self.simulated.lock();
        Ok(feed_ids
            .iter()
            .map(|f| {
                let value = simulated.get(f).copied().unwrap_or(1.0);
                U256::from((value * 1e8).round() as u128)
            })
            .collect())
    }
}

#[derive(Debug)]
pub struct MockRpc {
    pub block: AtomicU64,
    pub gas_price: Mutex<u128>,
    pub gas_price_delay: Mutex<Duration>,
    pub receipts: Mutex<HashMap<B256, TxReceiptSummary>>,
    pub sent: Mutex<Vec<Bytes>>,
    pub receipt_lookups: AtomicUsize,
}

impl MockRpc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            block: AtomicU64::new(100),
            gas_price: Mutex::new(1),
            gas_price_delay: Mutex::new(Duration::ZERO),
            receipts: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            receipt_lookups: AtomicUsize::new(0),
        })
    }

    pub fn add_receipt(&self, receipt: TxReceiptSummary) {
        self.receipts.lock().insert(receipt.hash, receipt);
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.block.load(Ordering::SeqCst))
    }
    async fn gas_price(&self) -> Result<u128> {
        let delay = *self.gas_price_delay.lock();
        tokio::time::sleep(delay).await;
        Ok(*self.gas_price.lock())
    }
    async fn max_priority_fee_per_gas(&self) -> Result<u128> {
        Ok(1)
    }
    async fn base_fee_per_gas(&self) -> Result<Option<u128>> {
        Ok(Some(1))
    }
    async fn transaction_count(&self, _address: Address) -> Result<u64> {
        Ok(0)
    }
    async fn call(&self, _to: Address, _data: Bytes, _block_number: u64) -> Result<Bytes> {
        bail!("eth_call is not mocked")
    }
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256> {
        self.sent.lock().push(raw);
        bail!("already known")
    }
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceiptSummary>> {
        self.receipt_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.receipts.lock().get(&hash).cloned())
    }
}

#[derive(Debug, Default)]
pub struct MockSubmitter {
    pub signed: Mutex<Vec<String>>,
}

#[async_trait]
impl TxSubmitter for MockSubmitter {
    fn address(&self) -> Address {
        Address::repeat_byte(0xaa)
    }
    async fn submit(&self, _call: &DeliveryCall) -> Result<DispatchedTx> {
        bail!("submissions go through the adapter")
    }
    async fn sign_message(&self, message: &[u8]) -> Result<Bytes> {
        self.signed
            .lock()
            .push(String::from_utf8_lossy(message).into_owned());
        Ok(Bytes::from(vec![7u8; 65]))
    }
}

/// Auction double answering per feed (or `"*"` for any feed).
#[derive(Debug, Default)]
pub struct MockAuction {
    pub responses: HashMap<String, Result<Vec<Bytes>, String>>,
    pub delay: Duration,
    pub requests: Mutex<Vec<(String, AuctionRequest)>>,
}

impl MockAuction {
    pub fn respond(mut self, feed_id: &str, response: Result<Vec<Bytes>, String>) -> Self {
        self.responses.insert(feed_id.to_string(), response);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl AuctionClient for MockAuction {
    async fn submit_for_auction(&self, request: &AuctionRequest, feed_id: &str) -> Result<Vec<Bytes>> {
        self.requests
            .lock()
            .push((feed_id.to_string(), request.clone()));
        tokio::time::sleep(self.delay).await;
        match self
            .responses
            .get(feed_id)
            .or_else(|| self.responses.get("*"))
        {
            Some(Ok(blobs)) => Ok(blobs.clone()),
            Some(Err(e)) => Err(anyhow!("{}", e)),
            None => Err(anyhow!("no bid for {}", feed_id)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockHealth {
    pub pings: AtomicUsize,
}

#[async_trait]
impl HealthMonitor for MockHealth {
    async fn ping(&self) {
        self.pings.fetch_add(1, Ordering::SeqCst);
    }
}
