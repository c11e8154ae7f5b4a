#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Consecutive passes without a receipt after which a submitted transaction is dropped.
    pub max_missed_passes: u32,
    /// Upper bound on receipt and nonce queries in flight during one pass.
    pub max_concurrent_lookups: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_missed_passes: 3,
            max_concurrent_lookups: 8,
        }
    }
}

/// What a completed reconciliation pass did with the submitted transactions it saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub processed: usize,
    pub confirmed: usize,
    pub dropped: usize,
    pub still_pending: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The nonce reservation was held elsewhere. Nothing was read or written.
    Busy,
    Completed(PassReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resubmission {
    Busy,
    Completed { attempted: usize, accepted: usize },
}

pub mod service {
    use std::{
        collections::{HashMap, HashSet},
        sync::{Arc, Mutex, MutexGuard, PoisonError},
    };

    use futures::{StreamExt, future, stream};
    use metrics::{
        RegistersMetrics,
        prometheus::{IntCounter, IntGauge, Opts, core::Collector},
    };
    use tracing::{debug, error, info, warn};

    use super::{Config, PassReport, Reconciliation, Resubmission};
    use crate::{
        Error, Result, Runner,
        nonce::NonceCoordinator,
        ports::{chain, clock::Clock},
        transaction_store::{TransactionQuery, port::Store, service::TransactionStore},
        types::{
            Address, ChainScope, TransactionReceipt, TransactionRecord, TransactionStatus, TxHash,
        },
    };

    struct Metrics {
        confirmed: IntCounter,
        dropped: IntCounter,
        resubmitted: IntCounter,
        pending: IntGauge,
    }

    impl Default for Metrics {
        fn default() -> Self {
            let confirmed = IntCounter::with_opts(Opts::new(
                "tracker_confirmed_transactions",
                "Number of transactions confirmed by the tracker.",
            ))
            .expect("tracker_confirmed_transactions metric to be correctly configured");

            let dropped = IntCounter::with_opts(Opts::new(
                "tracker_dropped_transactions",
                "Number of submitted transactions given up on.",
            ))
            .expect("tracker_dropped_transactions metric to be correctly configured");

            let resubmitted = IntCounter::with_opts(Opts::new(
                "tracker_resubmitted_transactions",
                "Number of rebroadcasts accepted by the node.",
            ))
            .expect("tracker_resubmitted_transactions metric to be correctly configured");

            let pending = IntGauge::with_opts(Opts::new(
                "tracker_pending_transactions",
                "Submitted transactions left unresolved by the last pass.",
            ))
            .expect("tracker_pending_transactions metric to be correctly configured");

            Self {
                confirmed,
                dropped,
                resubmitted,
                pending,
            }
        }
    }

    /// State carried between passes. Only touched while the nonce reservation is held.
    #[derive(Default)]
    struct Bookkeeping {
        network_nonces: HashMap<Address, u64>,
        missed_passes: HashMap<TxHash, u32>,
    }

    enum Outcome {
        Confirmed,
        Dropped,
        Unchanged,
    }

    /// Moves submitted transactions to `Confirmed` or `Dropped` based on what the chain reports.
    pub struct PendingTxTracker<C, S, Clk> {
        chain: C,
        store: TransactionStore<S>,
        coordinator: NonceCoordinator,
        clock: Clk,
        config: Config,
        bookkeeping: Mutex<Bookkeeping>,
        metrics: Metrics,
    }

    impl<C, S, Clk> RegistersMetrics for PendingTxTracker<C, S, Clk> {
        fn metrics(&self) -> Vec<Box<dyn Collector>> {
            vec![
                Box::new(self.metrics.confirmed.clone()),
                Box::new(self.metrics.dropped.clone()),
                Box::new(self.metrics.resubmitted.clone()),
                Box::new(self.metrics.pending.clone()),
            ]
        }
    }

    impl<C, S, Clk> PendingTxTracker<C, S, Clk> {
        pub fn new(
            chain: C,
            store: TransactionStore<S>,
            coordinator: NonceCoordinator,
            clock: Clk,
            config: Config,
        ) -> Self {
            Self {
                chain,
                store,
                coordinator,
                clock,
                config,
                bookkeeping: Mutex::new(Bookkeeping::default()),
                metrics: Metrics::default(),
            }
        }

        /// Forgets cached network nonces and miss counters, e.g. after switching chains.
        pub fn reset(&self) {
            *self.bookkeeping() = Bookkeeping::default();
            debug!("pending transaction bookkeeping cleared");
        }

        fn bookkeeping(&self) -> MutexGuard<'_, Bookkeeping> {
            self.bookkeeping
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        }

        fn forget(&self, tx_hash: &TxHash) {
            self.bookkeeping().missed_passes.remove(tx_hash);
        }

        fn concurrency(&self) -> usize {
            self.config.max_concurrent_lookups.max(1)
        }

        #[cfg(test)]
        fn missed_passes(&self, tx_hash: &TxHash) -> u32 {
            self.bookkeeping()
                .missed_passes
                .get(tx_hash)
                .copied()
                .unwrap_or_default()
        }

        #[cfg(test)]
        fn cached_network_nonce(&self, address: &Address) -> Option<u64> {
            self.bookkeeping().network_nonces.get(address).copied()
        }
    }

    impl<C, S, Clk> PendingTxTracker<C, S, Clk>
    where
        C: chain::Client,
        S: Store,
        Clk: Clock,
    {
        /// Runs one reconciliation pass over the submitted transactions of the active chain
        /// scope. Backs off with [`Reconciliation::Busy`] if the nonce reservation is taken.
        pub async fn reconcile_confirmations(&self) -> Result<Reconciliation> {
            let Some(_reservation) = self.coordinator.try_reserve() else {
                debug!("nonce reservation held elsewhere, skipping reconciliation pass");
                return Ok(Reconciliation::Busy);
            };

            let scope = self.store.active_scope();
            let confirmed = self
                .store
                .list(&Self::query(&scope, TransactionStatus::Confirmed))
                .await?;
            let submitted = self
                .store
                .list(&Self::query(&scope, TransactionStatus::Submitted))
                .await?;

            let claimed_nonces: HashMap<_, _> = confirmed
                .into_iter()
                .filter_map(|record| record.nonce.map(|nonce| ((record.from, nonce), record.id)))
                .collect();

            let tracked: HashSet<TxHash> =
                submitted.iter().filter_map(|record| record.tx_hash).collect();
            self.bookkeeping()
                .missed_passes
                .retain(|tx_hash, _| tracked.contains(tx_hash));

            let mut report = PassReport {
                processed: submitted.len(),
                ..PassReport::default()
            };

            let mut awaiting_receipt = Vec::with_capacity(submitted.len());
            for record in submitted {
                let superseded_by = record
                    .nonce
                    .and_then(|nonce| claimed_nonces.get(&(record.from, nonce)))
                    .filter(|winner| **winner != record.id);

                match (superseded_by, record.tx_hash) {
                    (Some(winner), _) => {
                        info!(
                            "transaction {} shares its nonce with confirmed transaction {winner}, dropping",
                            record.id
                        );
                        let outcome = self.drop_transaction(&scope, &record).await;
                        self.tally(&mut report, outcome);
                    }
                    (None, Some(tx_hash)) => awaiting_receipt.push((record, tx_hash)),
                    (None, None) => {
                        warn!("submitted transaction {} has no hash, skipping", record.id);
                        report.still_pending += 1;
                    }
                }
            }

            let network_nonces = std::mem::take(&mut self.bookkeeping().network_nonces);

            let lookups: Vec<_> = stream::iter(awaiting_receipt)
                .map(|(record, tx_hash)| async move {
                    let receipt = self.chain.get_receipt(tx_hash).await;
                    (record, tx_hash, receipt)
                })
                .buffer_unordered(self.concurrency())
                .collect()
                .await;

            let mut unresolved_senders = HashSet::new();
            for (record, tx_hash, receipt) in lookups {
                let outcome = match receipt {
                    Ok(Some(receipt)) if receipt.succeeded() => {
                        self.confirm_transaction(&scope, &record, receipt).await
                    }
                    Ok(receipt) => {
                        if receipt.is_some() {
                            debug!("transaction {} reverted on chain", record.id);
                        }
                        unresolved_senders.insert(record.from);

                        if self.should_drop(&record, tx_hash, &network_nonces) {
                            self.drop_transaction(&scope, &record).await
                        } else {
                            Outcome::Unchanged
                        }
                    }
                    Err(e) => {
                        warn!(
                            "could not fetch receipt of transaction {} ({}): {e}",
                            record.id,
                            record.hash_hex()
                        );
                        Outcome::Unchanged
                    }
                };
                self.tally(&mut report, outcome);
            }

            self.refresh_network_nonces(unresolved_senders).await;

            self.metrics
                .pending
                .set(i64::try_from(report.still_pending).unwrap_or(i64::MAX));
            if report.processed > 0 {
                info!(
                    "reconciled {} submitted transaction(s): {} confirmed, {} dropped, {} pending",
                    report.processed, report.confirmed, report.dropped, report.still_pending
                );
            }

            Ok(Reconciliation::Completed(report))
        }

        /// Rebroadcasts the signed payload of every submitted transaction of the active chain
        /// scope. Statuses are left untouched.
        pub async fn resubmit_pending(&self) -> Result<Resubmission> {
            let Some(_reservation) = self.coordinator.try_reserve() else {
                debug!("nonce reservation held elsewhere, skipping resubmission");
                return Ok(Resubmission::Busy);
            };

            let scope = self.store.active_scope();
            let pending = self
                .store
                .list(&Self::query(&scope, TransactionStatus::Submitted))
                .await?;

            let signed: Vec<_> = pending
                .into_iter()
                .filter_map(|record| {
                    let bytes = record.payload.signed_bytes()?.to_vec();
                    Some((record, bytes))
                })
                .collect();
            let attempted = signed.len();

            let accepted = stream::iter(signed)
                .map(|(record, bytes)| async move {
                    match self.chain.send_raw_transaction(bytes).await {
                        Ok(hash) => {
                            if Some(hash) != record.tx_hash {
                                warn!(
                                    "node reported hash {} for resubmitted transaction {} ({})",
                                    hex::encode(hash),
                                    record.id,
                                    record.hash_hex()
                                );
                            }
                            true
                        }
                        Err(e) => {
                            warn!("could not resubmit transaction {}: {e}", record.id);
                            false
                        }
                    }
                })
                .buffer_unordered(self.concurrency())
                .filter(|accepted| future::ready(*accepted))
                .count()
                .await;

            self.metrics.resubmitted.inc_by(accepted as u64);
            debug!("resubmitted {accepted}/{attempted} pending transaction(s)");

            Ok(Resubmission::Completed {
                attempted,
                accepted,
            })
        }

        fn query(scope: &ChainScope, status: TransactionStatus) -> TransactionQuery {
            TransactionQuery::all()
                .in_scope(scope.clone())
                .with_status(status)
        }

        fn should_drop(
            &self,
            record: &TransactionRecord,
            tx_hash: TxHash,
            network_nonces: &HashMap<Address, u64>,
        ) -> bool {
            if let (Some(nonce), Some(network_nonce)) =
                (record.nonce, network_nonces.get(&record.from))
            {
                if nonce < *network_nonce {
                    info!(
                        "nonce {nonce} of transaction {} is below the network nonce {network_nonce}, dropping",
                        record.id
                    );
                    return true;
                }
            }

            let missed = {
                let mut bookkeeping = self.bookkeeping();
                let missed = bookkeeping.missed_passes.entry(tx_hash).or_default();
                *missed = missed.saturating_add(1);
                *missed
            };

            if missed >= self.config.max_missed_passes {
                info!(
                    "transaction {} has no receipt after {missed} passes, dropping",
                    record.id
                );
                return true;
            }

            debug!("transaction {} still without receipt ({missed} passes)", record.id);
            false
        }

        async fn confirm_transaction(
            &self,
            scope: &ChainScope,
            record: &TransactionRecord,
            receipt: TransactionReceipt,
        ) -> Outcome {
            let now = self.clock.now();
            let result = self
                .store
                .update(scope, &record.id, move |current| current.confirmed(receipt, now))
                .await;

            match result {
                Ok(confirmed) => {
                    if let Some(tx_hash) = &confirmed.tx_hash {
                        self.forget(tx_hash);
                    }
                    info!(
                        "transaction {} confirmed in block {}",
                        confirmed.id,
                        receipt.block_number()
                    );
                    Outcome::Confirmed
                }
                Err(e) => {
                    self.note_failed_transition(record, TransactionStatus::Confirmed, &e);
                    Outcome::Unchanged
                }
            }
        }

        async fn drop_transaction(&self, scope: &ChainScope, record: &TransactionRecord) -> Outcome {
            match self
                .store
                .update(scope, &record.id, TransactionRecord::dropped)
                .await
            {
                Ok(dropped) => {
                    if let Some(tx_hash) = &dropped.tx_hash {
                        self.forget(tx_hash);
                    }
                    Outcome::Dropped
                }
                Err(e) => {
                    self.note_failed_transition(record, TransactionStatus::Dropped, &e);
                    Outcome::Unchanged
                }
            }
        }

        async fn refresh_network_nonces(&self, senders: HashSet<Address>) {
            let fetched: Vec<_> = stream::iter(senders)
                .map(|address| async move {
                    (address, self.chain.get_transaction_count(address).await)
                })
                .buffer_unordered(self.concurrency())
                .collect()
                .await;

            let mut bookkeeping = self.bookkeeping();
            for (address, count) in fetched {
                match count {
                    Ok(count) => {
                        bookkeeping.network_nonces.insert(address, count);
                    }
                    Err(e) => warn!("could not fetch network nonce of {address}: {e}"),
                }
            }
        }

        fn tally(&self, report: &mut PassReport, outcome: Outcome) {
            match outcome {
                Outcome::Confirmed => {
                    report.confirmed += 1;
                    self.metrics.confirmed.inc();
                }
                Outcome::Dropped => {
                    report.dropped += 1;
                    self.metrics.dropped.inc();
                }
                Outcome::Unchanged => report.still_pending += 1,
            }
        }
    }

    impl<C, S, Clk> PendingTxTracker<C, S, Clk> {
        fn note_failed_transition(
            &self,
            record: &TransactionRecord,
            target: TransactionStatus,
            e: &Error,
        ) {
            match e {
                Error::NotFound(_) => {
                    warn!(
                        "transaction {} disappeared before it could become {target}",
                        record.id
                    );
                    if let Some(tx_hash) = &record.tx_hash {
                        self.forget(tx_hash);
                    }
                }
                _ => error!("could not mark transaction {} as {target}: {e}", record.id),
            }
        }
    }

    /// Periodic driver of [`PendingTxTracker::reconcile_confirmations`].
    pub struct ConfirmationReconciler<C, S, Clk> {
        tracker: Arc<PendingTxTracker<C, S, Clk>>,
    }

    impl<C, S, Clk> ConfirmationReconciler<C, S, Clk> {
        pub fn new(tracker: Arc<PendingTxTracker<C, S, Clk>>) -> Self {
            Self { tracker }
        }
    }

    impl<C, S, Clk> Runner for ConfirmationReconciler<C, S, Clk>
    where
        C: chain::Client + Send,
        S: Store + Send,
        Clk: Clock + Send + Sync,
    {
        async fn run(&mut self) -> Result<()> {
            self.tracker.reconcile_confirmations().await?;
            Ok(())
        }
    }

    /// Periodic driver of [`PendingTxTracker::resubmit_pending`].
    pub struct PendingTxResubmitter<C, S, Clk> {
        tracker: Arc<PendingTxTracker<C, S, Clk>>,
    }

    impl<C, S, Clk> PendingTxResubmitter<C, S, Clk> {
        pub fn new(tracker: Arc<PendingTxTracker<C, S, Clk>>) -> Self {
            Self { tracker }
        }
    }

    impl<C, S, Clk> Runner for PendingTxResubmitter<C, S, Clk>
    where
        C: chain::Client + Send,
        S: Store + Send,
        Clk: Clock + Send + Sync,
    {
        async fn run(&mut self) -> Result<()> {
            self.tracker.resubmit_pending().await?;
            Ok(())
        }
    }

}
