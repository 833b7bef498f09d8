//! RPC provider chain.
//!
//! Every RPC capability the relayer needs goes through [`ChainRpc`]. The
//! production stack is composed once at startup, innermost first:
//!
//! - [`HttpRpc`]: one endpoint, every call bounded by the single-provider timeout
//! - [`FallbackRpc`]: tries endpoints in order, bounded by the all-providers timeout
//! - [`TracingRpc`]: timing and failure logs

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::types::TxReceiptSummary;

/// RPC capabilities used by adapters, gas strategies and the delivery manager.
#[async_trait]
pub trait ChainRpc: Send + Sync + Debug {
    async fn block_number(&self) -> Result<u64>;

    async fn gas_price(&self) -> Result<u128>;

    async fn max_priority_fee_per_gas(&self) -> Result<u128>;

    /// Base fee of the latest block (`None` on chains without EIP-1559).
    async fn base_fee_per_gas(&self) -> Result<Option<u128>>;

    async fn transaction_count(&self, address: Address) -> Result<u64>;

    /// `eth_call` against `to` at `block_number`.
    async fn call(&self, to: Address, data: Bytes, block_number: u64) -> Result<Bytes>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256>;

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceiptSummary>>;
}

/// Signed transaction decoded from its EIP-2718 envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTx {
    pub hash: B256,
    pub to: Option<Address>,
    pub input: Bytes,
    pub max_fee_per_gas: u128,
    pub raw: Bytes,
}

/// Decode a signed transaction blob.
pub fn decode_signed_transaction(raw: &Bytes) -> Result<DecodedTx> {
    let mut buf = raw.as_ref();
    let envelope = TxEnvelope::decode_2718(&mut buf)
        .map_err(|e| anyhow!("Invalid signed transaction: {}", e))?;

    Ok(DecodedTx {
        hash: *envelope.tx_hash(),
        to: envelope.to(),
        input: envelope.input().clone(),
        max_fee_per_gas: envelope.max_fee_per_gas(),
        raw: raw.clone(),
    })
}

/// Poll for a receipt until it appears or `timeout` elapses.
pub async fn wait_for_receipt(
    rpc: &dyn ChainRpc,
    hash: B256,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<TxReceiptSummary> {
    let poll = async {
        loop {
            match rpc.transaction_receipt(hash).await {
                Ok(Some(receipt)) => return receipt,
                Ok(None) => {}
                Err(e) => debug!(tx_hash = %hash, error = %e, "Receipt lookup failed, retrying"),
            }
            tokio::time::sleep(poll_interval).await;
        }
    };

    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| anyhow!("Timed out after {:?} waiting for tx {}", timeout, hash))
}

/// Single HTTP endpoint.
#[derive(Clone)]
pub struct HttpRpc {
    url: reqwest::Url,
    timeout: Duration,
}

impl Debug for HttpRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRpc")
            .field("host", &self.url.host_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpRpc {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", url))?;
        Ok(Self { url, timeout })
    }

    fn provider(&self) -> impl Provider {
        ProviderBuilder::new().on_http(self.url.clone())
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", op, self.timeout))?
    }
}

#[async_trait]
impl ChainRpc for HttpRpc {
    async fn block_number(&self) -> Result<u64> {
        self.bounded("eth_blockNumber", async {
            Ok(self.provider().get_block_number().await?)
        })
        .await
    }

    async fn gas_price(&self) -> Result<u128> {
        self.bounded("eth_gasPrice", async {
            Ok(self.provider().get_gas_price().await?)
        })
        .await
    }

    async fn max_priority_fee_per_gas(&self) -> Result<u128> {
        self.bounded("eth_maxPriorityFeePerGas", async {
            Ok(self.provider().get_max_priority_fee_per_gas().await?)
        })
        .await
    }

    async fn base_fee_per_gas(&self) -> Result<Option<u128>> {
        self.bounded("eth_getBlockByNumber", async {
            let block = self
                .provider()
                .get_block_by_number(BlockNumberOrTag::Latest)
                .await?
                .ok_or_else(|| anyhow!("Latest block not available"))?;
            Ok(block.header.base_fee_per_gas.map(|b| b as u128))
        })
        .await
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        self.bounded("eth_getTransactionCount", async {
            Ok(self.provider().get_transaction_count(address).await?)
        })
        .await
    }

    async fn call(&self, to: Address, data: Bytes, block_number: u64) -> Result<Bytes> {
        self.bounded("eth_call", async {
            let tx = TransactionRequest::default().with_to(to).with_input(data);
            let out: Bytes = self
                .provider()
                .raw_request(
                    "eth_call".into(),
                    (tx, BlockNumberOrTag::Number(block_number)),
                )
                .await?;
            Ok(out)
        })
        .await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256> {
        self.bounded("eth_sendRawTransaction", async {
            let pending = self.provider().send_raw_transaction(&raw).await?;
            Ok(*pending.tx_hash())
        })
        .await
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceiptSummary>> {
        self.bounded("eth_getTransactionReceipt", async {
            let receipt = self.provider().get_transaction_receipt(hash).await?;
            Ok(receipt.map(|r| TxReceiptSummary {
                hash,
                success: r.status(),
                block_number: r.block_number,
                transaction_index: r.transaction_index,
                gas_used: r.gas_used as u64,
                effective_gas_price: r.effective_gas_price,
            }))
        })
        .await
    }
}

/// Tries each provider in order; the whole attempt is bounded by one deadline.
#[derive(Debug, Clone)]
pub struct FallbackRpc {
    providers: Vec<Arc<dyn ChainRpc>>,
    all_providers_timeout: Duration,
}

impl FallbackRpc {
    pub fn new(providers: Vec<Arc<dyn ChainRpc>>, all_providers_timeout: Duration) -> Result<Self> {
        if providers.is_empty() {
            anyhow::bail!("At least one RPC provider is required");
        }
        Ok(Self {
            providers,
            all_providers_timeout,
        })
    }

    async fn first_ok<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: Fn(Arc<dyn ChainRpc>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let attempt = async {
            let mut last_error = None;
            for (index, provider) in self.providers.iter().enumerate() {
                match f(Arc::clone(provider)).await {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        warn!(op = op, provider = index, error = %e, "RPC provider failed, trying next");
                        last_error = Some(e);
                    }
                }
            }
            Err(last_error.unwrap_or_else(|| anyhow!("{}: no providers", op)))
        };

        tokio::time::timeout(self.all_providers_timeout, attempt)
            .await
            .map_err(|_| anyhow!("{}: all providers timed out after {:?}", op, self.all_providers_timeout))?
    }
}

#[async_trait]
impl ChainRpc for FallbackRpc {
    async fn block_number(&self) -> Result<u64> {
        self.first_ok("block_number", |p| async move { p.block_number().await })
            .await
    }

    async fn gas_price(&self) -> Result<u128> {
        self.first_ok("gas_price", |p| async move { p.gas_price().await })
            .await
    }

    async fn max_priority_fee_per_gas(&self) -> Result<u128> {
        self.first_ok("max_priority_fee_per_gas", |p| async move {
            p.max_priority_fee_per_gas().await
        })
        .await
    }

    async fn base_fee_per_gas(&self) -> Result<Option<u128>> {
        self.first_ok("base_fee_per_gas", |p| async move { p.base_fee_per_gas().await })
            .await
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        self.first_ok("transaction_count", |p| async move {
            p.transaction_count(address).await
        })
        .await
    }

    async fn call(&self, to: Address, data: Bytes, block_number: u64) -> Result<Bytes> {
        self.first_ok("call", |p| {
            let data = data.clone();
            async move { p.call(to, data, block_number).await }
        })
        .await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256> {
        self.first_ok("send_raw_transaction", |p| {
            let raw = raw.clone();
            async move { p.send_raw_transaction(raw).await }
        })
        .await
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceiptSummary>> {
        self.first_ok("transaction_receipt", |p| async move {
            p.transaction_receipt(hash).await
        })
        .await
    }
}

/// Logs latency of every call and the error of failed ones.
#[derive(Debug, Clone)]
pub struct TracingRpc {
    inner: Arc<dyn ChainRpc>,
}

impl TracingRpc {
    pub fn new(inner: Arc<dyn ChainRpc>) -> Self {
        Self { inner }
    }

    async fn observe<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        let start = Instant::now();
        let result = fut.await;
        let elapsed_ms = start.elapsed().as_millis();
        match &result {
            Ok(_) => debug!(op = op, elapsed_ms = elapsed_ms, "RPC call completed"),
            Err(e) => warn!(op = op, elapsed_ms = elapsed_ms, error = %e, "RPC call failed"),
        }
        result
    }
}

#[async_trait]
impl ChainRpc for TracingRpc {
    async fn block_number(&self) -> Result<u64> {
        self.observe("block_number", self.inner.block_number()).await
    }

    async fn gas_price(&self) -> Result<u128> {
        self.observe("gas_price", self.inner.gas_price()).await
    }

    async fn max_priority_fee_per_gas(&self) -> Result<u128> {
        self.observe("max_priority_fee_per_gas", self.inner.max_priority_fee_per_gas())
            .await
    }

    async fn base_fee_per_gas(&self) -> Result<Option<u128>> {
        self.observe("base_fee_per_gas", self.inner.base_fee_per_gas()).await
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        self.observe("transaction_count", self.inner.transaction_count(address))
            .await
    }

    async fn call(&self, to: Address, data: Bytes, block_number: u64) -> Result<Bytes> {
        self.observe("call", self.inner.call(to, data, block_number)).await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256> {
        self.observe("send_raw_transaction", self.inner.send_raw_transaction(raw))
            .await
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceiptSummary>> {
        self.observe("transaction_receipt", self.inner.transaction_receipt(hash))
            .await
    }
}

/// Build the production provider chain for `rpc_urls`.
pub fn build_rpc_stack(
    rpc_urls: &[String],
    single_provider_timeout: Duration,
    all_providers_timeout: Duration,
) -> Result<Arc<dyn ChainRpc>> {
    let providers = rpc_urls
        .iter()
        .map(|url| -> Result<Arc<dyn ChainRpc>> {
            Ok(Arc::new(HttpRpc::new(url, single_provider_timeout)?))
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        providers = providers.len(),
        single_provider_timeout_ms = single_provider_timeout.as_millis(),
        all_providers_timeout_ms = all_providers_timeout.as_millis(),
        "RPC provider chain initialized"
    );

    let fallback = FallbackRpc::new(providers, all_providers_timeout)?;
    Ok(Arc::new(TracingRpc::new(Arc::new(fallback))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider returning a fixed block number, or failing, or hanging.
    #[derive(Debug)]
    struct StubRpc {
        block: Option<u64>,
        hang: bool,
        calls: AtomicUsize,
    }

    impl StubRpc {
        fn new(block: Option<u64>, hang: bool) -> Arc<Self> {
            Arc::new(Self {
                block,
                hang,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChainRpc for StubRpc {
        async fn block_number(&self) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.block.ok_or_else(|| anyhow!("stub failure"))
        }
        async fn gas_price(&self) -> Result<u128> {
            Ok(1)
        }
        async fn max_priority_fee_per_gas(&self) -> Result<u128> {
            Ok(1)
        }
        async fn base_fee_per_gas(&self) -> Result<Option<u128>> {
            Ok(None)
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

    #[tokio::test]
    async fn test_fallback_uses_next_provider_on_error() {
        let failing = StubRpc::new(None, false);
        let healthy = StubRpc::new(Some(42), false);
        let rpc = FallbackRpc::new(
            vec![failing.clone() as Arc<dyn ChainRpc>, healthy.clone()],
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(rpc.block_number().await.unwrap(), 42);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_bounded_by_all_providers_timeout() {
        let hanging = StubRpc::new(Some(1), true);
        let rpc = FallbackRpc::new(vec![hanging as Arc<dyn ChainRpc>], Duration::from_millis(50)).unwrap();

        let err = rpc.block_number().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_fallback_requires_provider() {
        assert!(FallbackRpc::new(Vec::new(), Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_wait_for_receipt_times_out() {
        let rpc = StubRpc::new(Some(1), false);
        let result = wait_for_receipt(
            rpc.as_ref(),
            B256::ZERO,
            Duration::from_millis(5),
            Duration::from_millis(30),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_signed_transaction(&Bytes::from(vec![0xff, 0x00])).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_http_block_number() {
        let rpc = HttpRpc::new("https://eth.llamarpc.com", Duration::from_secs(5)).unwrap();
        assert!(rpc.block_number().await.unwrap() > 0);
    }
}
