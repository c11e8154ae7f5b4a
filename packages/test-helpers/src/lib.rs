#![deny(unused_crate_dependencies)]

use clock::TestClock;
use services::{
    NonceCoordinator, NonceTracker, PendingTxTracker, TrackerConfig, TransactionStore,
    TransactionSubmitter,
    transaction_store::{port::Store, testing::InMemoryStore},
    types::{Address, ChainScope, DateTime, Payload, TransactionRecord, Utc},
};
use storage::{DbWithProcess, PostgresProcess};

pub use mocks::chain::FakeChain;

pub mod mocks {
    pub mod chain {
        use std::{
            collections::HashMap,
            sync::{Arc, Mutex, PoisonError},
        };

        use alloy::primitives::keccak256;
        use services::types::{Address, TransactionReceipt, TxHash};

        #[derive(Default)]
        struct ChainState {
            receipts: HashMap<TxHash, TransactionReceipt>,
            transaction_counts: HashMap<Address, u64>,
            broadcasts: Vec<Vec<u8>>,
            offline: bool,
        }

        /// Scriptable stand-in for a node. Clones share state, so a test can keep a handle
        /// after passing one to the code under test.
        #[derive(Clone, Default)]
        pub struct FakeChain {
            state: Arc<Mutex<ChainState>>,
        }

        impl FakeChain {
            pub fn mine(&self, tx_hash: TxHash, receipt: TransactionReceipt) {
                self.state().receipts.insert(tx_hash, receipt);
            }

            pub fn set_transaction_count(&self, address: Address, count: u64) {
                self.state().transaction_counts.insert(address, count);
            }

            /// While offline every call fails with a provider error.
            pub fn set_offline(&self, offline: bool) {
                self.state().offline = offline;
            }

            pub fn broadcasts(&self) -> Vec<Vec<u8>> {
                self.state().broadcasts.clone()
            }

            /// Hash the node reports for a raw signed payload.
            pub fn hash_of(payload: &[u8]) -> TxHash {
                keccak256(payload).0
            }

            fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
                self.state.lock().unwrap_or_else(PoisonError::into_inner)
            }

            fn ensure_online(&self) -> services::Result<()> {
                if self.state().offline {
                    return Err(services::Error::Provider("node unreachable".to_string()));
                }
                Ok(())
            }
        }

        impl services::ports::chain::Client for FakeChain {
            async fn get_receipt(
                &self,
                tx_hash: TxHash,
            ) -> services::Result<Option<TransactionReceipt>> {
                self.ensure_online()?;
                Ok(self.state().receipts.get(&tx_hash).copied())
            }

            async fn get_transaction_count(&self, address: Address) -> services::Result<u64> {
                self.ensure_online()?;
                Ok(self
                    .state()
                    .transaction_counts
                    .get(&address)
                    .copied()
                    .unwrap_or_default())
            }

            async fn send_raw_transaction(&self, payload: Vec<u8>) -> services::Result<TxHash> {
                self.ensure_online()?;
                let tx_hash = Self::hash_of(&payload);
                self.state().broadcasts.push(payload);
                Ok(tx_hash)
            }
        }
    }
}

/// Wires the services against a [`FakeChain`], a [`TestClock`] and a store backend.
pub struct Setup<S = InMemoryStore> {
    store: TransactionStore<S>,
    chain: FakeChain,
    test_clock: TestClock,
    coordinator: NonceCoordinator,
}

impl Setup<InMemoryStore> {
    pub fn init() -> Self {
        Self::with_backend(InMemoryStore::default())
    }
}

impl Setup<DbWithProcess> {
    pub async fn init_with_postgres() -> Self {
        let db = PostgresProcess::shared()
            .await
            .unwrap()
            .create_random_db()
            .await
            .unwrap();

        Self::with_backend(db)
    }
}

impl<S> Setup<S>
where
    S: Store,
{
    pub fn with_backend(backend: S) -> Self {
        let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();

        Self {
            store: TransactionStore::new(backend, Self::mainnet()),
            chain: FakeChain::default(),
            test_clock: TestClock::new(start),
            coordinator: NonceCoordinator::new(),
        }
    }

    pub fn mainnet() -> ChainScope {
        ChainScope::new("0x1").unwrap()
    }

    pub fn store(&self) -> TransactionStore<S> {
        self.store.clone()
    }

    pub fn chain(&self) -> FakeChain {
        self.chain.clone()
    }

    pub fn test_clock(&self) -> TestClock {
        self.test_clock.clone()
    }

    pub fn coordinator(&self) -> NonceCoordinator {
        self.coordinator.clone()
    }

    pub fn tracker(&self, config: TrackerConfig) -> PendingTxTracker<FakeChain, S, TestClock> {
        PendingTxTracker::new(
            self.chain(),
            self.store(),
            self.coordinator(),
            self.test_clock(),
            config,
        )
    }

    pub fn submitter(&self) -> TransactionSubmitter<FakeChain, S, TestClock> {
        TransactionSubmitter::new(self.chain(), self.store(), self.test_clock())
    }

    pub fn nonce_tracker(&self) -> NonceTracker<FakeChain, S> {
        NonceTracker::new(self.chain(), self.store(), self.coordinator())
    }

    pub async fn insert_unapproved(&self, from: Address) -> TransactionRecord {
        let record = TransactionRecord::new(
            self.store.active_scope(),
            from,
            Payload::Unsigned(vec![0xc0]),
            self.test_clock.now(),
        );
        self.store.put(record.clone()).await.unwrap();
        record
    }

    /// Inserts a record and broadcasts `signed` for it with the given nonce.
    pub async fn insert_submitted(
        &self,
        from: Address,
        nonce: u64,
        signed: Vec<u8>,
    ) -> TransactionRecord {
        let record = self.insert_unapproved(from).await;
        self.submitter()
            .submit(&record.id, nonce, signed)
            .await
            .unwrap()
    }
}
