use tokio::sync::mpsc;

use crate::types::{Address, ChainScope, RecordKey, TransactionRecord, TransactionStatus};

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

/// Change notification emitted after a write to the store has been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    New(TransactionRecord),
    StatusChanged(TransactionRecord),
    Deleted(RecordKey),
}

/// Receiving half of a store subscription. Events arrive in the order the writes were applied.
pub struct TransactionEvents {
    rx: mpsc::UnboundedReceiver<TransactionEvent>,
}

impl TransactionEvents {
    pub async fn recv(&mut self) -> Option<TransactionEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TransactionEvent> {
        self.rx.try_recv().ok()
    }

    /// Feeds every event into `observer` until the store is dropped.
    pub async fn forward_to(mut self, observer: impl port::Observer) {
        while let Some(event) = self.recv().await {
            match &event {
                TransactionEvent::New(record) => observer.on_new_transaction(record),
                TransactionEvent::StatusChanged(record) => observer.on_status_changed(record),
                TransactionEvent::Deleted(key) => observer.on_deleted(key),
            }
        }
    }
}

#[derive(Default)]
struct Subscribers {
    senders: std::sync::Mutex<Vec<mpsc::UnboundedSender<TransactionEvent>>>,
}

impl Subscribers {
    fn subscribe(&self) -> TransactionEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        TransactionEvents { rx }
    }

    fn publish(&self, event: TransactionEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<TransactionEvent>>> {
        self.senders
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Filter for [`service::TransactionStore::list`]. An empty query matches every record of the
/// active chain scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionQuery {
    scope: Option<ChainScope>,
    status: Option<TransactionStatus>,
    from: Option<Address>,
}

impl TransactionQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn from(mut self, address: Address) -> Self {
        self.from = Some(address);
        self
    }

    pub fn in_scope(mut self, scope: ChainScope) -> Self {
        self.scope = Some(scope);
        self
    }

    fn matches(&self, record: &TransactionRecord) -> bool {
        self.status.is_none_or(|status| record.status == status)
            && self.from.is_none_or(|from| record.from == from)
    }
}

pub mod service {
    use std::sync::{Arc, PoisonError, RwLock};

    use tracing::{debug, info, warn};

    use super::{Subscribers, TransactionEvent, TransactionEvents, TransactionQuery, port::Store};
    use crate::{
        Error, Result,
        types::{ChainScope, RecordKey, TransactionRecord, TransactionStatus, TxId},
    };

    /// Typed, validating view over a [`Store`]. Clones share the same backend, active scope
    /// and subscribers.
    pub struct TransactionStore<S> {
        inner: Arc<Inner<S>>,
    }

    impl<S> Clone for TransactionStore<S> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    struct Inner<S> {
        storage: S,
        active_scope: RwLock<ChainScope>,
        // Serializes read-validate-write sequences so that transitions and their
        // notifications are applied in one order.
        write_lock: tokio::sync::Mutex<()>,
        subscribers: Subscribers,
    }

    impl<S> TransactionStore<S> {
        pub fn new(storage: S, active_scope: ChainScope) -> Self {
            Self {
                inner: Arc::new(Inner {
                    storage,
                    active_scope: RwLock::new(active_scope),
                    write_lock: tokio::sync::Mutex::new(()),
                    subscribers: Subscribers::default(),
                }),
            }
        }

        pub fn active_scope(&self) -> ChainScope {
            self.inner
                .active_scope
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Switches the scope used by the operations that do not name one explicitly.
        pub fn set_active_scope(&self, scope: ChainScope) {
            let mut active = self
                .inner
                .active_scope
                .write()
                .unwrap_or_else(PoisonError::into_inner);

            if *active != scope {
                info!("active chain scope changed from {} to {scope}", *active);
                *active = scope;
            }
        }

        pub fn subscribe(&self) -> TransactionEvents {
            self.inner.subscribers.subscribe()
        }
    }

    impl<S> TransactionStore<S>
    where
        S: Store,
    {
        /// Inserts a new `Unapproved` record or rewrites an existing one. The rewrite must be a
        /// legal successor of the stored record.
        pub async fn put(&self, record: TransactionRecord) -> Result<()> {
            record.validate()?;

            let _write = self.inner.write_lock.lock().await;
            let key = record.key();
            let previous = self.read(&key).await?;
            self.commit(&key, previous.as_ref(), record).await?;

            Ok(())
        }

        /// Applies `mutation` to the stored record and persists the result under the same
        /// invariants as [`Self::put`].
        pub async fn update<F>(
            &self,
            scope: &ChainScope,
            id: &TxId,
            mutation: F,
        ) -> Result<TransactionRecord>
        where
            F: FnOnce(TransactionRecord) -> Result<TransactionRecord> + Send,
        {
            let _write = self.inner.write_lock.lock().await;
            let key = RecordKey::new(scope.clone(), id.clone());
            let previous = self
                .read(&key)
                .await?
                .ok_or_else(|| Error::NotFound(key.to_string()))?;

            let next = mutation(previous.clone())?;
            next.validate()?;
            self.commit(&key, Some(&previous), next.clone()).await?;

            Ok(next)
        }

        pub async fn get(&self, id: &TxId) -> Result<Option<TransactionRecord>> {
            self.get_in(&self.active_scope(), id).await
        }

        pub async fn get_in(&self, scope: &ChainScope, id: &TxId) -> Result<Option<TransactionRecord>> {
            self.read(&RecordKey::new(scope.clone(), id.clone())).await
        }

        /// Removes the record from the active scope. Deleting a missing record is not an error.
        pub async fn delete(&self, id: &TxId) -> Result<()> {
            self.delete_in(&self.active_scope(), id).await
        }

        pub async fn delete_in(&self, scope: &ChainScope, id: &TxId) -> Result<()> {
            let _write = self.inner.write_lock.lock().await;
            let key = RecordKey::new(scope.clone(), id.clone());

            if self.inner.storage.remove(&key).await? {
                debug!("deleted transaction {key}");
                self.inner.subscribers.publish(TransactionEvent::Deleted(key));
            }

            Ok(())
        }

        /// Records matching `query`. Records that fail to decode are skipped with a warning.
        pub async fn list(&self, query: &TransactionQuery) -> Result<Vec<TransactionRecord>> {
            let scope = query.scope.clone().unwrap_or_else(|| self.active_scope());

            let records = self
                .inner
                .storage
                .values(&scope)
                .await?
                .into_iter()
                .filter_map(|(key, bytes)| match decode(&key, &bytes) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!("skipping unreadable transaction record: {e}");
                        None
                    }
                })
                .filter(|record| query.matches(record))
                .collect();

            Ok(records)
        }

        pub async fn list_by_status(
            &self,
            status: Option<TransactionStatus>,
            from: Option<crate::types::Address>,
        ) -> Result<Vec<TransactionRecord>> {
            let mut query = TransactionQuery::all();
            if let Some(status) = status {
                query = query.with_status(status);
            }
            if let Some(from) = from {
                query = query.from(from);
            }

            self.list(&query).await
        }

        /// Removes every record of the active scope. Observers are not notified.
        pub async fn wipe(&self) -> Result<()> {
            self.wipe_in(&self.active_scope()).await
        }

        pub async fn wipe_in(&self, scope: &ChainScope) -> Result<()> {
            let _write = self.inner.write_lock.lock().await;
            let removed = self.inner.storage.clear(scope).await?;
            info!("wiped {removed} transaction(s) from chain scope {scope}");

            Ok(())
        }

        async fn read(&self, key: &RecordKey) -> Result<Option<TransactionRecord>> {
            self.inner
                .storage
                .get(key)
                .await?
                .map(|bytes| decode(key, &bytes))
                .transpose()
        }

        async fn commit(
            &self,
            key: &RecordKey,
            previous: Option<&TransactionRecord>,
            next: TransactionRecord,
        ) -> Result<()> {
            match previous {
                Some(previous) => previous.validate_successor(&next)?,
                None if next.status != TransactionStatus::Unapproved => {
                    return Err(Error::InvariantViolation(format!(
                        "new transaction {key} must start unapproved, got {}",
                        next.status
                    )));
                }
                None => {}
            }

            let becomes_confirmed = next.status == TransactionStatus::Confirmed
                && previous.is_none_or(|previous| previous.status != TransactionStatus::Confirmed);
            if becomes_confirmed {
                self.ensure_nonce_unclaimed(&next).await?;
            }

            self.inner.storage.set(key, serde_json::to_vec(&next)?).await?;

            let event = if previous.is_some() {
                TransactionEvent::StatusChanged(next)
            } else {
                TransactionEvent::New(next)
            };
            self.inner.subscribers.publish(event);

            Ok(())
        }

        async fn ensure_nonce_unclaimed(&self, record: &TransactionRecord) -> Result<()> {
            let query = TransactionQuery::all()
                .in_scope(record.chain_scope.clone())
                .with_status(TransactionStatus::Confirmed)
                .from(record.from);

            let claimed_by = self
                .list(&query)
                .await?
                .into_iter()
                .find(|other| other.id != record.id && other.nonce == record.nonce);

            if let Some(other) = claimed_by {
                return Err(Error::InvariantViolation(format!(
                    "nonce {:?} of {} is already confirmed by transaction {}",
                    record.nonce, record.from, other.id
                )));
            }

            Ok(())
        }
    }

    fn decode(key: &RecordKey, bytes: &[u8]) -> Result<TransactionRecord> {
        let corrupted =
            |reason: String| Error::StorageUnavailable(format!("record {key} is corrupted: {reason}"));

        let record: TransactionRecord =
            serde_json::from_slice(bytes).map_err(|e| corrupted(e.to_string()))?;

        if record.key() != *key {
            return Err(corrupted(format!("stored under the key of {}", record.key())));
        }
        record.validate().map_err(|e| corrupted(e.to_string()))?;

        Ok(record)
    }
}

pub mod port {
    use crate::{
        Result,
        types::{ChainScope, RecordKey, TransactionRecord},
    };

    /// Raw key-value persistence. Values are opaque to the backend.
    #[allow(async_fn_in_trait)]
    #[trait_variant::make(Send)]
    pub trait Store: Sync {
        async fn get(&self, key: &RecordKey) -> Result<Option<Vec<u8>>>;
        async fn set(&self, key: &RecordKey, value: Vec<u8>) -> Result<()>;
        /// Returns whether a value was removed.
        async fn remove(&self, key: &RecordKey) -> Result<bool>;
        async fn values(&self, scope: &ChainScope) -> Result<Vec<(RecordKey, Vec<u8>)>>;
        /// Returns the number of removed values.
        async fn clear(&self, scope: &ChainScope) -> Result<u64>;
    }

    pub trait Observer: Send {
        fn on_new_transaction(&self, _record: &TransactionRecord) {}
        fn on_status_changed(&self, _record: &TransactionRecord) {}
        fn on_deleted(&self, _key: &RecordKey) {}
    }
}
