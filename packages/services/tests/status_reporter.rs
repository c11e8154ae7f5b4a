use pretty_assertions::assert_eq;
use services::{
    StatusReport, StatusReporter, TrackerConfig,
    types::{Address, TransactionReceipt},
};
use test_helpers::{FakeChain, Setup};

#[tokio::test]
async fn status_reflects_tracked_transactions() {
    // given
    let setup = Setup::init();
    let from = Address::new([0xb0; 20]);
    setup.insert_unapproved(from).await;
    setup.insert_submitted(from, 0, vec![1]).await;
    setup.insert_submitted(from, 1, vec![2]).await;
    setup.chain().mine(
        FakeChain::hash_of(&[1]),
        TransactionReceipt::new(1, true, 21_000, 1),
    );
    setup
        .tracker(TrackerConfig::default())
        .reconcile_confirmations()
        .await
        .unwrap();

    let reporter = StatusReporter::new(setup.store());

    // when
    let status = reporter.current_status().await.unwrap();

    // then
    assert_eq!(
        status,
        StatusReport {
            chain_scope: "0x1".to_string(),
            unapproved: 1,
            submitted: 1,
            confirmed: 1,
            dropped: 0,
        }
    );
}
