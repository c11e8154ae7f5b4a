pub mod health_reporter;
pub mod nonce;
pub mod pending_tx_tracker;
pub mod ports;
pub mod status_reporter;
pub mod transaction_store;
pub mod transaction_submitter;
pub mod types;

pub use health_reporter::HealthReporter;
pub use nonce::{NonceCoordinator, NonceReservation, ReservedNonce, service::NonceTracker};
pub use pending_tx_tracker::{
    Config as TrackerConfig, PassReport, Reconciliation, Resubmission,
    service::{ConfirmationReconciler, PendingTxResubmitter, PendingTxTracker},
};
pub use status_reporter::service::{StatusReport, StatusReporter};
pub use transaction_store::{
    TransactionEvent, TransactionEvents, TransactionQuery, service::TransactionStore,
};
pub use transaction_submitter::service::TransactionSubmitter;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("transaction not found: {0}")]
    NotFound(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Other(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[allow(async_fn_in_trait)]
#[trait_variant::make(Send)]
pub trait Runner {
    async fn run(&mut self) -> Result<()>;
}
