pub mod service {
    use std::{
        collections::HashMap,
        sync::{Mutex, MutexGuard, PoisonError},
    };

    use tracing::{info, warn};

    use crate::{
        Error, Result,
        ports::{chain, clock::Clock},
        transaction_store::{port::Store, service::TransactionStore},
        types::{DateTime, Payload, RecordKey, TransactionRecord, TransactionStatus, TxHash, TxId, Utc},
    };

    /// A payload the node accepted but whose `Submitted` write has not landed yet.
    struct Broadcast {
        nonce: u64,
        signed: Vec<u8>,
        tx_hash: TxHash,
        at: DateTime<Utc>,
    }

    /// Broadcasts approved transactions and records them as `Submitted`.
    pub struct TransactionSubmitter<C, S, Clk> {
        chain: C,
        store: TransactionStore<S>,
        clock: Clk,
        unrecorded: Mutex<HashMap<RecordKey, Broadcast>>,
    }

    impl<C, S, Clk> TransactionSubmitter<C, S, Clk> {
        pub fn new(chain: C, store: TransactionStore<S>, clock: Clk) -> Self {
            Self {
                chain,
                store,
                clock,
                unrecorded: Mutex::new(HashMap::new()),
            }
        }

        fn unrecorded(&self) -> MutexGuard<'_, HashMap<RecordKey, Broadcast>> {
            self.unrecorded
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl<C, S, Clk> TransactionSubmitter<C, S, Clk>
    where
        C: chain::Client,
        S: Store,
        Clk: Clock,
    {
        /// Sends `signed` for the unapproved transaction `id` of the active chain scope. If the
        /// node rejects the payload the record stays `Unapproved`.
        ///
        /// When the node accepted the payload but the store write failed, the broadcast is kept
        /// and a later call with the same nonce and payload records it without sending again.
        pub async fn submit(&self, id: &TxId, nonce: u64, signed: Vec<u8>) -> Result<TransactionRecord> {
            let scope = self.store.active_scope();
            let key = RecordKey::new(scope.clone(), id.clone());
            let record = self
                .store
                .get_in(&scope, id)
                .await?
                .ok_or_else(|| Error::NotFound(key.to_string()))?;

            if record.status != TransactionStatus::Unapproved {
                self.unrecorded().remove(&key);
                return Err(Error::InvariantViolation(format!(
                    "transaction {id} is already {}",
                    record.status
                )));
            }
            if record.nonce.is_some_and(|assigned| assigned != nonce) {
                return Err(Error::InvariantViolation(format!(
                    "transaction {id} was assigned nonce {:?}, not {nonce}",
                    record.nonce
                )));
            }

            let earlier = self
                .unrecorded()
                .remove(&key)
                .filter(|broadcast| broadcast.nonce == nonce && broadcast.signed == signed);

            let broadcast = match earlier {
                Some(broadcast) => {
                    info!("recording earlier broadcast of transaction {id}");
                    broadcast
                }
                None => Broadcast {
                    tx_hash: self.chain.send_raw_transaction(signed.clone()).await?,
                    at: self.clock.now(),
                    nonce,
                    signed,
                },
            };

            let (tx_hash, at) = (broadcast.tx_hash, broadcast.at);
            let payload = Payload::Signed(broadcast.signed.clone());
            let result = self
                .store
                .update(&scope, id, move |current| {
                    current.submitted(nonce, tx_hash, payload, at)
                })
                .await;

            let submitted = match result {
                Ok(submitted) => submitted,
                Err(e) => {
                    warn!(
                        "transaction {id} was broadcast as {} but could not be recorded: {e}",
                        hex::encode(tx_hash)
                    );
                    self.unrecorded().insert(key, broadcast);
                    return Err(e);
                }
            };

            info!(
                "submitted transaction {id} from {} with nonce {nonce} as {}",
                submitted.from,
                submitted.hash_hex()
            );

            Ok(submitted)
        }
    }

    #[cfg(test)]
    mod tests {
        use mockall::predicate::eq;
        use pretty_assertions::assert_eq;

        use super::*;
        use crate::{
            transaction_store::testing::InMemoryStore,
            types::{Address, ChainScope, DateTime, Utc},
        };

        struct FixedClock;

        impl Clock for FixedClock {
            fn now(&self) -> DateTime<Utc> {
                DateTime::<Utc>::from_timestamp(500, 0).unwrap()
            }
        }

        async fn given_unapproved() -> (TransactionStore<InMemoryStore>, InMemoryStore, TransactionRecord) {
            let backend = InMemoryStore::default();
            let store = TransactionStore::new(backend.clone(), ChainScope::new("0x1").unwrap());
            let record = TransactionRecord::new(
                store.active_scope(),
                Address::repeat_byte(3),
                Payload::Unsigned(vec![1]),
                DateTime::<Utc>::from_timestamp(100, 0).unwrap(),
            );
            store.put(record.clone()).await.unwrap();
            (store, backend, record)
        }

        #[tokio::test]
        async fn records_broadcast_transaction_as_submitted() {
            // given
            let (store, _, record) = given_unapproved().await;
            let mut chain = chain::MockClient::new();
            chain
                .expect_send_raw_transaction()
                .with(eq(vec![0xde, 0xad]))
                .returning(|_| Box::pin(async { Ok([7; 32]) }));
            let sut = TransactionSubmitter::new(chain, store.clone(), FixedClock);

            // when
            let submitted = sut.submit(&record.id, 4, vec![0xde, 0xad]).await.unwrap();

            // then
            assert_eq!(submitted.status, TransactionStatus::Submitted);
            assert_eq!(submitted.nonce, Some(4));
            assert_eq!(submitted.tx_hash, Some([7; 32]));
            assert_eq!(submitted.payload, Payload::Signed(vec![0xde, 0xad]));
            assert_eq!(store.get(&record.id).await.unwrap(), Some(submitted));
        }

        #[tokio::test]
        async fn rejected_broadcast_leaves_record_unapproved() {
            // given
            let (store, _, record) = given_unapproved().await;
            let mut chain = chain::MockClient::new();
            chain.expect_send_raw_transaction().returning(|_| {
                Box::pin(async { Err(Error::Provider("insufficient funds".to_string())) })
            });
            let sut = TransactionSubmitter::new(chain, store.clone(), FixedClock);

            // when
            let err = sut.submit(&record.id, 0, vec![1]).await.unwrap_err();

            // then
            assert!(matches!(err, Error::Provider(_)));
            assert_eq!(store.get(&record.id).await.unwrap(), Some(record));
        }

        #[tokio::test]
        async fn does_not_broadcast_twice() {
            // given
            let (store, _, record) = given_unapproved().await;
            let mut chain = chain::MockClient::new();
            chain
                .expect_send_raw_transaction()
                .times(1)
                .returning(|_| Box::pin(async { Ok([7; 32]) }));
            let sut = TransactionSubmitter::new(chain, store, FixedClock);
            sut.submit(&record.id, 0, vec![1]).await.unwrap();

            // when
            let err = sut.submit(&record.id, 0, vec![1]).await.unwrap_err();

            // then
            assert!(matches!(err, Error::InvariantViolation(_)));
        }

        #[tokio::test]
        async fn store_outage_after_broadcast_is_recorded_on_retry() {
            // given
            let (store, backend, record) = given_unapproved().await;
            let outage = backend.clone();
            let mut chain = chain::MockClient::new();
            chain.expect_send_raw_transaction().times(1).returning(move |_| {
                outage.set_unavailable(true);
                Box::pin(async { Ok([7; 32]) })
            });
            let sut = TransactionSubmitter::new(chain, store.clone(), FixedClock);

            let err = sut.submit(&record.id, 2, vec![0xbe, 0xef]).await.unwrap_err();
            assert!(matches!(err, Error::StorageUnavailable(_)));
            backend.set_unavailable(false);

            // when
            let submitted = sut.submit(&record.id, 2, vec![0xbe, 0xef]).await.unwrap();

            // then
            assert_eq!(submitted.status, TransactionStatus::Submitted);
            assert_eq!(submitted.tx_hash, Some([7; 32]));
            assert_eq!(submitted.nonce, Some(2));
            assert_eq!(store.get(&record.id).await.unwrap(), Some(submitted));
        }

        #[tokio::test]
        async fn retry_with_another_payload_broadcasts_again() {
            // given
            let (store, backend, record) = given_unapproved().await;
            let outage = backend.clone();
            let mut chain = chain::MockClient::new();
            let mut seq = mockall::Sequence::new();
            chain
                .expect_send_raw_transaction()
                .with(eq(vec![1]))
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_| {
                    outage.set_unavailable(true);
                    Box::pin(async { Ok([1; 32]) })
                });
            chain
                .expect_send_raw_transaction()
                .with(eq(vec![2]))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Box::pin(async { Ok([2; 32]) }));
            let sut = TransactionSubmitter::new(chain, store.clone(), FixedClock);

            sut.submit(&record.id, 0, vec![1]).await.unwrap_err();
            backend.set_unavailable(false);

            // when
            let submitted = sut.submit(&record.id, 0, vec![2]).await.unwrap();

            // then
            assert_eq!(submitted.tx_hash, Some([2; 32]));
        }

        #[tokio::test]
        async fn unknown_transaction_is_not_found() {
            let (store, _, _) = given_unapproved().await;
            let mut chain = chain::MockClient::new();
            chain.expect_send_raw_transaction().never();
            let sut = TransactionSubmitter::new(chain, store, FixedClock);

            let err = sut.submit(&TxId::from("nope"), 0, vec![]).await.unwrap_err();

            assert!(matches!(err, Error::NotFound(_)));
        }
    }
}
