//! Detached receipt monitoring.
//!
//! Delivery returns once a hash is known. Inclusion is observed by a spawned
//! task whose outcome is only logged; a second task supervises it so a panic
//! in the monitor surfaces in the logs instead of vanishing with the task.

use alloy::primitives::B256;
use relayer_chain::{wait_for_receipt, ChainRpc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ReceiptMonitor {
    rpc: Arc<dyn ChainRpc>,
    poll_interval: Duration,
    timeout: Duration,
}

impl ReceiptMonitor {
    pub fn new(rpc: Arc<dyn ChainRpc>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            rpc,
            poll_interval,
            timeout,
        }
    }

    /// Watch `hash` in the background. The returned handle completes after the
    /// monitor has finished and its result was logged.
    pub fn watch(&self, hash: B256) -> JoinHandle<()> {
        let rpc = self.rpc.clone();
        let poll_interval = self.poll_interval;
        let timeout = self.timeout;

        let monitor = tokio::spawn(async move {
            match wait_for_receipt(rpc.as_ref(), hash, poll_interval, timeout).await {
                Ok(receipt) => {
                    let block = receipt
                        .block_number
                        .map_or_else(|| "pending".to_string(), |b| b.to_string());
                    let index = receipt
                        .transaction_index
                        .map_or_else(|| "?".to_string(), |i| i.to_string());
                    let msg = format!(
                        "Transaction {} mined with {}({}) in block #{} [tx index: {}]",
                        hash,
                        receipt.status_label(),
                        u8::from(receipt.success),
                        block,
                        index
                    );
                    if receipt.success {
                        info!(
                            tx_hash = %hash,
                            gas_used = receipt.gas_used,
                            effective_gas_price = receipt.effective_gas_price,
                            "{}", msg
                        );
                    } else {
                        warn!(tx_hash = %hash, gas_used = receipt.gas_used, "{}", msg);
                    }
                }
                Err(e) => {
                    warn!(tx_hash = %hash, error = %e, "Transaction receipt not observed");
                }
            }
        });

        tokio::spawn(async move {
            if let Err(e) = monitor.await {
                if e.is_panic() {
                    error!(tx_hash = %hash, error = %e, "Receipt monitor panicked");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{receipt, MockRpc};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_watch_completes_on_receipt() {
        let rpc = MockRpc::new();
        let hash = B256::repeat_byte(3);
        rpc.add_receipt(receipt(hash, true));

        let monitor = ReceiptMonitor::new(rpc.clone(), Duration::from_millis(5), Duration::from_secs(1));
        monitor.watch(hash).await.unwrap();
        assert_eq!(rpc.receipt_lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watch_gives_up_after_timeout() {
        let rpc = MockRpc::new();
        let monitor =
            ReceiptMonitor::new(rpc.clone(), Duration::from_millis(5), Duration::from_millis(30));
        monitor.watch(B256::repeat_byte(4)).await.unwrap();
        assert!(rpc.receipt_lookups.load(Ordering::SeqCst) >= 2);
    }
}
