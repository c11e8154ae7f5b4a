use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Advisory lock over nonce bookkeeping. Whoever assigns nonces or reconciles submitted
/// transactions holds a [`NonceReservation`] while doing so. Clones share the lock.
#[derive(Debug, Clone, Default)]
pub struct NonceCoordinator {
    lock: Arc<Mutex<()>>,
}

/// Proof of holding the [`NonceCoordinator`]. Released on drop, on every exit path.
#[derive(Debug)]
pub struct NonceReservation {
    _guard: OwnedMutexGuard<()>,
}

impl NonceCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` without waiting if someone else holds the reservation.
    pub fn try_reserve(&self) -> Option<NonceReservation> {
        Arc::clone(&self.lock)
            .try_lock_owned()
            .ok()
            .map(|guard| NonceReservation { _guard: guard })
    }

    pub async fn reserve(&self) -> NonceReservation {
        NonceReservation {
            _guard: Arc::clone(&self.lock).lock_owned().await,
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

/// A nonce handed out by [`service::NonceTracker`] together with the reservation that keeps
/// other assignments and reconciliation passes out until the caller is done with it.
#[derive(Debug)]
pub struct ReservedNonce {
    pub nonce: u64,
    reservation: NonceReservation,
}

impl ReservedNonce {
    pub fn into_reservation(self) -> NonceReservation {
        self.reservation
    }
}

pub mod service {
    use tracing::debug;

    use super::{NonceCoordinator, ReservedNonce};
    use crate::{
        Result,
        ports::chain,
        transaction_store::{TransactionQuery, port::Store, service::TransactionStore},
        types::{Address, TransactionStatus},
    };

    /// Picks the next nonce for a sender from the chain's transaction count and the nonces
    /// already used by locally tracked transactions.
    pub struct NonceTracker<C, S> {
        chain: C,
        store: TransactionStore<S>,
        coordinator: NonceCoordinator,
    }

    impl<C, S> NonceTracker<C, S> {
        pub fn new(chain: C, store: TransactionStore<S>, coordinator: NonceCoordinator) -> Self {
            Self {
                chain,
                store,
                coordinator,
            }
        }
    }

    impl<C, S> NonceTracker<C, S>
    where
        C: chain::Client,
        S: Store,
    {
        /// Waits for the coordinator and returns the nonce to use for the next transaction
        /// from `from`. The reservation stays held until the returned value is dropped.
        pub async fn next_nonce(&self, from: Address) -> Result<ReservedNonce> {
            let reservation = self.coordinator.reserve().await;

            let network_nonce = self.chain.get_transaction_count(from).await?;
            let highest_local = self
                .store
                .list(&TransactionQuery::all().from(from))
                .await?
                .into_iter()
                .filter(|record| {
                    matches!(
                        record.status,
                        TransactionStatus::Submitted | TransactionStatus::Confirmed
                    )
                })
                .filter_map(|record| record.nonce)
                .max();

            let nonce = highest_local
                .and_then(|highest| highest.checked_add(1))
                .map_or(network_nonce, |next_local| next_local.max(network_nonce));

            debug!("next nonce for {from} is {nonce} (network reports {network_nonce})");

            Ok(ReservedNonce { nonce, reservation })
        }
    }
}
