#[cfg(feature = "test-helpers")]
mod test_instance;

#[cfg(feature = "test-helpers")]
pub use test_instance::*;

pub(crate) mod error;
mod postgres;
pub use postgres::{DbConfig, Postgres};
use services::{
    Result,
    transaction_store::port::Store,
    types::{ChainScope, RecordKey},
};

impl Store for Postgres {
    async fn get(&self, key: &RecordKey) -> Result<Option<Vec<u8>>> {
        self._get(key).await.map_err(Into::into)
    }

    async fn set(&self, key: &RecordKey, value: Vec<u8>) -> Result<()> {
        self._set(key, value).await.map_err(Into::into)
    }

    async fn remove(&self, key: &RecordKey) -> Result<bool> {
        self._remove(key).await.map_err(Into::into)
    }

    async fn values(&self, scope: &ChainScope) -> Result<Vec<(RecordKey, Vec<u8>)>> {
        self._values(scope).await.map_err(Into::into)
    }

    async fn clear(&self, scope: &ChainScope) -> Result<u64> {
        self._clear(scope).await.map_err(Into::into)
    }
}
