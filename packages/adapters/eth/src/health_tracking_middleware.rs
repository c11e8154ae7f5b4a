use ::metrics::{
    ConnectionHealthTracker, HealthChecker, RegistersMetrics, prometheus::core::Collector,
};
use services::types::{Address, TransactionReceipt, TxHash};

use crate::{
    error::{Error, Result},
    metrics::Metrics,
};

/// Raw node calls, before their errors are folded into [`services::Error`].
#[allow(async_fn_in_trait)]
#[trait_variant::make(Send)]
#[cfg_attr(test, mockall::automock)]
pub trait EthApi: Sync {
    async fn get_transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>>;
    async fn get_transaction_count(&self, address: Address) -> Result<u64>;
    async fn send_raw_transaction(&self, payload: Vec<u8>) -> Result<TxHash>;
}

/// Wraps an [`EthApi`] and marks the connection unhealthy after consecutive network errors.
#[derive(Clone)]
pub struct HealthTrackingMiddleware<T> {
    adapter: T,
    metrics: Metrics,
    health_tracker: ConnectionHealthTracker,
}

impl<T> HealthTrackingMiddleware<T> {
    pub fn new(adapter: T, unhealthy_after_n_errors: usize) -> Self {
        Self {
            adapter,
            metrics: Metrics::default(),
            health_tracker: ConnectionHealthTracker::new(unhealthy_after_n_errors),
        }
    }

    pub fn connection_health_checker(&self) -> HealthChecker {
        self.health_tracker.tracker()
    }

    fn note_network_status<K>(&self, method: &str, response: &Result<K>) {
        match response {
            Ok(_) => self.health_tracker.note_success(),
            Err(Error::Network { .. }) => {
                self.metrics
                    .eth_network_errors
                    .with_label_values(&[method])
                    .inc();
                self.health_tracker.note_failure();
            }
            Err(_) => {}
        }
    }
}

impl<T> RegistersMetrics for HealthTrackingMiddleware<T> {
    fn metrics(&self) -> Vec<Box<dyn Collector>> {
        self.metrics.metrics()
    }
}

impl<T> services::ports::chain::Client for HealthTrackingMiddleware<T>
where
    T: EthApi + Send,
{
    async fn get_receipt(&self, tx_hash: TxHash) -> services::Result<Option<TransactionReceipt>> {
        let response = self.adapter.get_transaction_receipt(tx_hash).await;
        self.note_network_status("get_transaction_receipt", &response);
        Ok(response?)
    }

    async fn get_transaction_count(&self, address: Address) -> services::Result<u64> {
        let response = self.adapter.get_transaction_count(address).await;
        self.note_network_status("get_transaction_count", &response);
        Ok(response?)
    }

    async fn send_raw_transaction(&self, payload: Vec<u8>) -> services::Result<TxHash> {
        let response = self.adapter.send_raw_transaction(payload).await;
        self.note_network_status("send_raw_transaction", &response);
        Ok(response?)
    }
}
