use alloy::{
    network::Ethereum,
    primitives::B256,
    providers::{Provider, RootProvider},
    rpc::types::TransactionReceipt as RpcReceipt,
};
use services::types::{Address, TransactionReceipt, TxHash};
use tracing::debug;
use url::Url;

use crate::{
    error::{Error, Result},
    health_tracking_middleware::EthApi,
};

/// JSON-RPC over HTTP. Holds no keys: payloads arrive already signed.
#[derive(Debug, Clone)]
pub struct HttpClient {
    provider: RootProvider<Ethereum>,
}

impl HttpClient {
    pub fn new(url: Url) -> Self {
        Self {
            provider: RootProvider::new_http(url),
        }
    }

    fn convert_receipt(receipt: RpcReceipt) -> Result<TransactionReceipt> {
        let block_number = receipt.block_number.ok_or_else(|| {
            Error::Other("transaction receipt does not contain block number".to_string())
        })?;

        Ok(TransactionReceipt::new(
            block_number,
            receipt.status(),
            receipt.gas_used,
            receipt.effective_gas_price,
        ))
    }
}

impl EthApi for HttpClient {
    async fn get_transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(B256::from(tx_hash))
            .await?;

        if receipt.is_none() {
            debug!("no receipt yet for 0x{}", alloy::hex::encode(tx_hash));
        }

        receipt.map(Self::convert_receipt).transpose()
    }

    async fn get_transaction_count(&self, address: Address) -> Result<u64> {
        Ok(self.provider.get_transaction_count(address).await?)
    }

    async fn send_raw_transaction(&self, payload: Vec<u8>) -> Result<TxHash> {
        let pending = self.provider.send_raw_transaction(&payload).await?;

        Ok(pending.tx_hash().0)
    }
}
