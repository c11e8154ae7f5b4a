pub mod service {
    use serde::Serialize;

    use crate::{
        Result,
        transaction_store::{TransactionQuery, port::Store, service::TransactionStore},
        types::TransactionStatus,
    };

    #[derive(Debug, Serialize, Default, PartialEq, Eq)]
    pub struct StatusReport {
        pub chain_scope: String,
        pub unapproved: usize,
        pub submitted: usize,
        pub confirmed: usize,
        pub dropped: usize,
    }

    pub struct StatusReporter<S> {
        store: TransactionStore<S>,
    }

    impl<S> StatusReporter<S> {
        pub fn new(store: TransactionStore<S>) -> Self {
            Self { store }
        }
    }

    impl<S> StatusReporter<S>
    where
        S: Store,
    {
        pub async fn current_status(&self) -> Result<StatusReport> {
            let scope = self.store.active_scope();
            let records = self
                .store
                .list(&TransactionQuery::all().in_scope(scope.clone()))
                .await?;

            let mut report = StatusReport {
                chain_scope: scope.to_string(),
                ..StatusReport::default()
            };
            for record in records {
                let counter = match record.status {
                    TransactionStatus::Unapproved => &mut report.unapproved,
                    TransactionStatus::Submitted => &mut report.submitted,
                    TransactionStatus::Confirmed => &mut report.confirmed,
                    TransactionStatus::Dropped => &mut report.dropped,
                };
                *counter += 1;
            }

            Ok(report)
        }
    }

}
