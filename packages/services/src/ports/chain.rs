use crate::{
    Result,
    types::{Address, TransactionReceipt, TxHash},
};

/// Read and write access to the chain node. Any error is a provider error and carries no
/// information about the transaction it was asked about.
#[allow(async_fn_in_trait)]
#[trait_variant::make(Send)]
#[cfg_attr(feature = "test-helpers", mockall::automock)]
pub trait Client: Sync {
    async fn get_receipt(&self, tx_hash: TxHash) -> Result<Option<TransactionReceipt>>;
    /// Number of transactions mined from `address`, i.e. the next nonce the chain expects.
    async fn get_transaction_count(&self, address: Address) -> Result<u64>;
    async fn send_raw_transaction(&self, payload: Vec<u8>) -> Result<TxHash>;
}
