#![deny(unused_crate_dependencies)]
mod api;
mod config;
mod errors;
mod setup;

use api::launch_api_server;
use config::Internal;
use errors::Result;
use metrics::prometheus::Registry;
use services::NonceCoordinator;
use setup::{
    create_eth_adapter, create_tracker, create_transaction_store, setup_logger, setup_storage,
    shut_down, spawn_confirmation_reconciler, spawn_pending_tx_resubmitter,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub type L1 = eth::HealthTrackingMiddleware<eth::HttpClient>;
pub type Database = storage::Postgres;
pub type Tracker = services::PendingTxTracker<L1, Database, clock::SystemClock>;

#[tokio::main]
async fn main() -> Result<()> {
    setup_logger();

    let config = config::parse()?;

    let storage = setup_storage(&config).await?;
    let store = create_transaction_store(&config, storage.clone());

    let internal_config = Internal::default();
    let cancel_token = CancellationToken::new();

    let metrics_registry = Registry::default();

    let (l1, eth_health_check) = create_eth_adapter(&config, &internal_config, &metrics_registry);

    let tracker = create_tracker(
        &config,
        l1,
        store.clone(),
        NonceCoordinator::new(),
        &metrics_registry,
    );

    let reconciler_handle =
        spawn_confirmation_reconciler(&config, tracker.clone(), cancel_token.clone());
    let resubmitter_handle = spawn_pending_tx_resubmitter(&config, tracker, cancel_token.clone());

    info!("tracking transactions on chain {}", config.eth.chain_scope);

    launch_api_server(&config, metrics_registry, store, eth_health_check).await?;

    shut_down(
        cancel_token,
        [reconciler_handle, resubmitter_handle],
        storage,
    )
    .await
}
