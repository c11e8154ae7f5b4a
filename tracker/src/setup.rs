use std::{sync::Arc, time::Duration};

use clock::SystemClock;
use metrics::{HealthChecker, RegistersMetrics, prometheus::Registry};
use services::{
    ConfirmationReconciler, NonceCoordinator, PendingTxResubmitter, PendingTxTracker, Runner,
    TransactionStore,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    Database, L1, Tracker,
    config::{Config, Internal},
    errors::{Error, Result, WithContext},
};

pub fn create_eth_adapter(
    config: &Config,
    internal_config: &Internal,
    registry: &Registry,
) -> (L1, HealthChecker) {
    let client = eth::HttpClient::new(config.eth.rpc.clone());
    let l1 = L1::new(client, internal_config.eth_errors_before_unhealthy);

    l1.register_metrics(registry);

    let health_check = l1.connection_health_checker();

    (l1, health_check)
}

pub fn create_transaction_store(config: &Config, storage: Database) -> TransactionStore<Database> {
    TransactionStore::new(storage, config.eth.chain_scope.clone())
}

pub fn create_tracker(
    config: &Config,
    l1: L1,
    store: TransactionStore<Database>,
    coordinator: NonceCoordinator,
    registry: &Registry,
) -> Arc<Tracker> {
    let tracker = PendingTxTracker::new(
        l1,
        store,
        coordinator,
        SystemClock,
        config.tracker_config(),
    );

    tracker.register_metrics(registry);

    Arc::new(tracker)
}

pub fn spawn_confirmation_reconciler(
    config: &Config,
    tracker: Arc<Tracker>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    schedule_polling(
        config.app.reconcile_interval,
        ConfirmationReconciler::new(tracker),
        "Confirmation Reconciler",
        cancel_token,
    )
}

pub fn spawn_pending_tx_resubmitter(
    config: &Config,
    tracker: Arc<Tracker>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    schedule_polling(
        config.app.resubmit_interval,
        PendingTxResubmitter::new(tracker),
        "Pending Tx Resubmitter",
        cancel_token,
    )
}

fn schedule_polling(
    polling_interval: Duration,
    mut runner: impl Runner + 'static,
    name: &'static str,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = runner.run().await {
                error!("{name} encountered an error: {e}");
            }

            tokio::select! {
                () = cancel_token.cancelled() => break,
                () = tokio::time::sleep(polling_interval) => {}
            }
        }

        info!("{name} stopped");
    })
}

pub fn setup_logger() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_line_number(true)
        .json()
        .init();
}

pub async fn setup_storage(config: &Config) -> Result<Database> {
    let postgres = Database::connect(&config.app.db)
        .await
        .map_err(Error::from)
        .with_context(|| "could not connect to postgres")?;
    postgres
        .migrate()
        .await
        .map_err(Error::from)
        .with_context(|| "could not run migrations")?;

    Ok(postgres)
}

pub async fn shut_down(
    cancel_token: CancellationToken,
    handles: impl IntoIterator<Item = JoinHandle<()>>,
    storage: Database,
) -> Result<()> {
    cancel_token.cancel();

    for handle in handles {
        handle.await?;
    }

    storage.close().await;
    Ok(())
}
