use std::{sync::Arc, time::Duration};

use clock::TestClock;
use pretty_assertions::assert_eq;
use services::{
    ConfirmationReconciler, PassReport, Reconciliation, Runner, TrackerConfig, TransactionEvent,
    types::{Address, ChainScope, TransactionReceipt, TransactionStatus},
};
use test_helpers::{FakeChain, Setup};

const ALICE: Address = Address::new([0xa1; 20]);

fn successful_receipt() -> TransactionReceipt {
    TransactionReceipt::new(19_000_000, true, 21_000, 30_000_000_000)
}

async fn reconcile<S>(tracker: &services::PendingTxTracker<FakeChain, S, TestClock>) -> PassReport
where
    S: services::transaction_store::port::Store,
{
    match tracker.reconcile_confirmations().await.unwrap() {
        Reconciliation::Completed(report) => report,
        Reconciliation::Busy => panic!("nothing else should hold the reservation"),
    }
}

#[tokio::test]
async fn transaction_goes_from_unapproved_to_confirmed() {
    // given
    let setup = Setup::init();
    let mut events = setup.store().subscribe();
    setup.chain().set_transaction_count(ALICE, 4);

    let record = setup.insert_unapproved(ALICE).await;
    let reserved = setup.nonce_tracker().next_nonce(ALICE).await.unwrap();
    let nonce = reserved.nonce;
    let signed = vec![0x02, 0xf8, 0x01];
    let submitted = setup
        .submitter()
        .submit(&record.id, nonce, signed.clone())
        .await
        .unwrap();
    drop(reserved);

    setup.test_clock().advance_time(Duration::from_secs(12));
    setup
        .chain()
        .mine(FakeChain::hash_of(&signed), successful_receipt());
    let tracker = setup.tracker(TrackerConfig::default());

    // when
    let report = reconcile(&tracker).await;

    // then
    assert_eq!(nonce, 4);
    assert_eq!(report.confirmed, 1);

    let confirmed = setup.store().get(&record.id).await.unwrap().unwrap();
    assert_eq!(confirmed.status, TransactionStatus::Confirmed);
    assert_eq!(confirmed.tx_hash, Some(FakeChain::hash_of(&signed)));
    assert_eq!(confirmed.receipt, Some(successful_receipt()));
    assert_eq!(confirmed.confirmed_time, Some(setup.test_clock().now()));

    assert_eq!(events.try_recv(), Some(TransactionEvent::New(record)));
    assert_eq!(
        events.try_recv(),
        Some(TransactionEvent::StatusChanged(submitted))
    );
    assert_eq!(
        events.try_recv(),
        Some(TransactionEvent::StatusChanged(confirmed))
    );
}

#[tokio::test]
async fn next_nonce_accounts_for_transactions_still_in_flight() {
    // given
    let setup = Setup::init();
    setup.chain().set_transaction_count(ALICE, 1);
    setup.insert_submitted(ALICE, 1, vec![1]).await;
    setup.insert_submitted(ALICE, 2, vec![2]).await;

    // when
    let reserved = setup.nonce_tracker().next_nonce(ALICE).await.unwrap();

    // then
    assert_eq!(reserved.nonce, 3);
    assert!(setup.coordinator().is_reserved());
}

#[tokio::test]
async fn replacement_is_dropped_once_the_original_confirms() {
    // given
    let setup = Setup::init();
    setup.chain().set_transaction_count(ALICE, 7);
    let original = setup.insert_submitted(ALICE, 7, vec![0xaa]).await;
    let speed_up = setup.insert_submitted(ALICE, 7, vec![0xbb]).await;
    setup
        .chain()
        .mine(FakeChain::hash_of(&[0xaa]), successful_receipt());
    let tracker = setup.tracker(TrackerConfig::default());

    // when
    let first = reconcile(&tracker).await;
    let second = reconcile(&tracker).await;

    // then
    assert_eq!(first.confirmed, 1);
    assert_eq!(first.still_pending, 1);
    assert_eq!(second.dropped, 1);

    let store = setup.store();
    let original = store.get(&original.id).await.unwrap().unwrap();
    let speed_up = store.get(&speed_up.id).await.unwrap().unwrap();
    assert_eq!(original.status, TransactionStatus::Confirmed);
    assert_eq!(speed_up.status, TransactionStatus::Dropped);
}

#[tokio::test]
async fn transaction_is_dropped_when_its_nonce_was_used_elsewhere() {
    // given
    let setup = Setup::init();
    let record = setup.insert_submitted(ALICE, 0, vec![0xaa]).await;
    setup.chain().set_transaction_count(ALICE, 1);
    let tracker = setup.tracker(TrackerConfig::default());

    // when
    let first = reconcile(&tracker).await;
    let second = reconcile(&tracker).await;

    // then
    assert_eq!(first.still_pending, 1);
    assert_eq!(second.dropped, 1);
    let dropped = setup.store().get(&record.id).await.unwrap().unwrap();
    assert_eq!(dropped.status, TransactionStatus::Dropped);
}

#[tokio::test]
async fn outage_does_not_count_towards_dropping() {
    // given
    let setup = Setup::init();
    let record = setup.insert_submitted(ALICE, 0, vec![0xaa]).await;
    let chain = setup.chain();
    let tracker = setup.tracker(TrackerConfig {
        max_missed_passes: 2,
        ..TrackerConfig::default()
    });

    // when
    chain.set_offline(true);
    for _ in 0..5 {
        assert_eq!(reconcile(&tracker).await.still_pending, 1);
    }
    chain.set_offline(false);
    chain.mine(FakeChain::hash_of(&[0xaa]), successful_receipt());
    let report = reconcile(&tracker).await;

    // then
    assert_eq!(report.confirmed, 1);
    let confirmed = setup.store().get(&record.id).await.unwrap().unwrap();
    assert_eq!(confirmed.status, TransactionStatus::Confirmed);
}

#[tokio::test]
async fn resubmission_rebroadcasts_without_changing_status() {
    // given
    let setup = Setup::init();
    let record = setup.insert_submitted(ALICE, 0, vec![0xaa]).await;
    let tracker = setup.tracker(TrackerConfig::default());

    // when
    tracker.resubmit_pending().await.unwrap();

    // then
    assert_eq!(setup.chain().broadcasts(), vec![vec![0xaa], vec![0xaa]]);
    let stored = setup.store().get(&record.id).await.unwrap().unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
async fn switching_chains_leaves_the_old_scope_alone() {
    // given
    let setup = Setup::init();
    let mainnet_tx = setup.insert_submitted(ALICE, 0, vec![0xaa]).await;
    let tracker = setup.tracker(TrackerConfig::default());
    reconcile(&tracker).await;
    reconcile(&tracker).await;

    // when
    setup.store().set_active_scope(ChainScope::new("0x5").unwrap());
    tracker.reset();
    let report = reconcile(&tracker).await;

    // then
    assert_eq!(report, PassReport::default());
    let untouched = setup
        .store()
        .get_in(&ChainScope::new("0x1").unwrap(), &mainnet_tx.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.status, TransactionStatus::Submitted);
}

#[tokio::test]
async fn reconciler_runner_drives_passes() {
    // given
    let setup = Setup::init();
    let record = setup.insert_submitted(ALICE, 0, vec![0xaa]).await;
    setup
        .chain()
        .mine(FakeChain::hash_of(&[0xaa]), successful_receipt());
    let mut runner =
        ConfirmationReconciler::new(Arc::new(setup.tracker(TrackerConfig::default())));

    // when
    runner.run().await.unwrap();

    // then
    let confirmed = setup.store().get(&record.id).await.unwrap().unwrap();
    assert_eq!(confirmed.status, TransactionStatus::Confirmed);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn works_on_top_of_postgres() {
    // given
    let setup = Setup::init_with_postgres().await;
    let record = setup.insert_submitted(ALICE, 0, vec![0xaa]).await;
    setup
        .chain()
        .mine(FakeChain::hash_of(&[0xaa]), successful_receipt());
    let tracker = setup.tracker(TrackerConfig::default());

    // when
    let report = reconcile(&tracker).await;

    // then
    assert_eq!(report.confirmed, 1);
    let confirmed = setup.store().get(&record.id).await.unwrap().unwrap();
    assert_eq!(confirmed.status, TransactionStatus::Confirmed);
}
