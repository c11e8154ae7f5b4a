use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use super::port::Store;
use crate::{
    Error, Result,
    types::{ChainScope, RecordKey},
};

/// Volatile [`Store`] for tests. Clones share their contents.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    values: Arc<Mutex<BTreeMap<RecordKey, Vec<u8>>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// While set, every operation fails with [`Error::StorageUnavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Stores `value` bypassing any validation.
    pub fn insert_raw(&self, key: RecordKey, value: Vec<u8>) {
        self.entries().insert(key, value);
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<RecordKey, Vec<u8>>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StorageUnavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        Ok(())
    }
}

impl Store for InMemoryStore {
    async fn get(&self, key: &RecordKey) -> Result<Option<Vec<u8>>> {
        self.ensure_available()?;
        Ok(self.entries().get(key).cloned())
    }

    async fn set(&self, key: &RecordKey, value: Vec<u8>) -> Result<()> {
        self.ensure_available()?;
        self.entries().insert(key.clone(), value);
        Ok(())
    }

    async fn remove(&self, key: &RecordKey) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.entries().remove(key).is_some())
    }

    async fn values(&self, scope: &ChainScope) -> Result<Vec<(RecordKey, Vec<u8>)>> {
        self.ensure_available()?;
        Ok(self
            .entries()
            .iter()
            .filter(|(key, _)| key.chain_scope == *scope)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn clear(&self, scope: &ChainScope) -> Result<u64> {
        self.ensure_available()?;
        let mut values = self.entries();
        let before = values.len();
        values.retain(|key, _| key.chain_scope != *scope);
        Ok((before - values.len()) as u64)
    }
}
