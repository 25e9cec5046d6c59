//! Concurrency tests.
//!
//! Many buyers and scanners hitting the lifecycle manager at once. Every test
//! runs on the multi-threaded runtime so requests genuinely interleave.
//!
//! Run with: `cargo test --test concurrency_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use chrono::Duration;
use futures::future::join_all;
use proptest::prelude::*;
use std::sync::Arc;
use ticketgate_core::environment::Clock;
use ticketgate_core::{
    CommitScope, CredentialSigner, Money, ReservationOutcome, ServiceKind, TicketError,
    TicketStore, TicketType, TicketTypeId,
};
use ticketgate_testing::{
    InMemoryActivityRecorder, InMemoryTicketStore, MockClock, RecordingDelivery, test_clock,
};
use ticketing::{ExpirySweeper, LifecycleDeps, LifecycleSettings, RedemptionAuth, TicketLifecycle};

struct TestEnv {
    lifecycle: TicketLifecycle,
    sweeper: Arc<ExpirySweeper>,
    store: InMemoryTicketStore,
    clock: MockClock,
}

fn create_test_env(capacity: u32) -> TestEnv {
    let store = InMemoryTicketStore::with_types([TicketType::new(
        "standard",
        Money::new(500_000),
        capacity,
    )]);
    let clock = MockClock::starting_at(test_clock().now());
    let recorder = InMemoryActivityRecorder::new();
    let settings = LifecycleSettings::default();

    let lifecycle = TicketLifecycle::new(
        LifecycleDeps {
            store: Arc::new(store.clone()),
            clock: Arc::new(clock.clone()),
            recorder: Arc::new(recorder.clone()),
            delivery: Arc::new(RecordingDelivery::new()),
        },
        CredentialSigner::new("concurrency-secret").unwrap(),
        settings.clone(),
    );
    let sweeper = ExpirySweeper::new(
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        Arc::new(recorder),
        settings.expiry_window,
        std::time::Duration::from_secs(60),
    );

    TestEnv { lifecycle, sweeper: Arc::new(sweeper), store, clock }
}

async fn committed(store: &InMemoryTicketStore) -> u32 {
    store
        .committed_quantity(TicketTypeId::new("standard"), CommitScope::ReservedAndPaid)
        .await
        .unwrap()
}

/// Fire one reservation per `(buyer, quantity)` concurrently.
async fn reserve_all(
    lifecycle: &TicketLifecycle,
    requests: Vec<(String, u32)>,
) -> Vec<Result<ReservationOutcome, TicketError>> {
    let handles = requests.into_iter().map(|(buyer, quantity)| {
        let lifecycle = lifecycle.clone();
        tokio::spawn(async move { lifecycle.reserve(&buyer, "standard", quantity).await })
    });
    join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("reservation task panicked"))
        .collect()
}

/// Test 1: Fifty buyers, ten tickets
///
/// Exactly ten reservations succeed and the rest see `OutOfStock`.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_buyers_never_oversell() {
    let env = create_test_env(10);
    let requests = (0..50).map(|i| (format!("buyer{i}@example.com"), 1)).collect();

    let results = reserve_all(&env.lifecycle, requests).await;

    let created = results
        .iter()
        .filter(|r| matches!(r, Ok(ReservationOutcome::Created(_))))
        .count();
    let out_of_stock = results
        .iter()
        .filter(|r| matches!(r, Err(TicketError::OutOfStock { .. })))
        .count();
    assert_eq!(created, 10);
    assert_eq!(out_of_stock, 40);
    assert_eq!(committed(&env.store).await, 10);
}

/// Test 2: One buyer double-clicking
///
/// However the requests interleave, the buyer ends up with a single
/// reservation and every response names it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_buyer_gets_one_reservation() {
    let env = create_test_env(100);
    let requests = (0..20).map(|_| ("dup@example.com".to_string(), 2)).collect();

    let results = reserve_all(&env.lifecycle, requests).await;
    let outcomes: Vec<ReservationOutcome> = results.into_iter().map(Result::unwrap).collect();

    let created = outcomes
        .iter()
        .filter(|o| matches!(o, ReservationOutcome::Created(_)))
        .count();
    assert_eq!(created, 1);
    let ticket_id = outcomes[0].reservation().ticket_id;
    assert!(outcomes.iter().all(|o| o.reservation().ticket_id == ticket_id));
    assert_eq!(env.store.ticket_count(), 1);
    assert_eq!(committed(&env.store).await, 2);
}

/// Test 3: Payment racing the sweeper
///
/// Whichever commits first wins: either the ticket is Paid and the sweep
/// skipped it, or it was expired and the confirmation saw `TicketNotFound`.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_confirm_and_sweep_are_mutually_exclusive() {
    for round in 0..25 {
        let env = create_test_env(1);
        let outcome = env
            .lifecycle
            .reserve(&format!("racer{round}@example.com"), "standard", 1)
            .await
            .unwrap();
        let ticket_id = outcome.reservation().ticket_id;
        env.clock.advance(Duration::minutes(16));

        let lifecycle = env.lifecycle.clone();
        let confirm = tokio::spawn(async move { lifecycle.confirm_payment(ticket_id).await });
        let sweeper = Arc::clone(&env.sweeper);
        let sweep = tokio::spawn(async move { sweeper.sweep_once().await });

        let confirmed = confirm.await.unwrap();
        let report = sweep.await.unwrap().unwrap();

        match confirmed {
            Ok(paid) => {
                assert!(report.expired.is_empty());
                assert_eq!(env.lifecycle.ticket(ticket_id).await.unwrap(), paid);
                assert_eq!(committed(&env.store).await, 1);
            }
            Err(e) => {
                assert_eq!(e, TicketError::TicketNotFound);
                assert_eq!(report.expired, vec![ticket_id]);
                assert_eq!(env.store.ticket_count(), 0);
                assert_eq!(committed(&env.store).await, 0);
            }
        }
    }
}

/// Test 4: Many scanners, one food voucher
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redemptions_succeed_once() {
    let env = create_test_env(10);
    let outcome = env.lifecycle.reserve("a@example.com", "standard", 1).await.unwrap();
    let paid = env
        .lifecycle
        .confirm_payment(outcome.reservation().ticket_id)
        .await
        .unwrap();
    let ticket_id = paid.id;
    let token = paid.credential.unwrap().token;
    env.lifecycle.check_in(ticket_id, &token).await.unwrap();

    let handles = (0..16).map(|_| {
        let lifecycle = env.lifecycle.clone();
        let auth = RedemptionAuth::Credential(token.clone());
        tokio::spawn(async move { lifecycle.redeem(ticket_id, ServiceKind::Food, auth).await })
    });
    let results: Vec<_> = join_all(handles).await.into_iter().map(Result::unwrap).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| *e == TicketError::AlreadyRedeemed { kind: ServiceKind::Food })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_check_ins_succeed_once() {
    let env = create_test_env(10);
    let outcome = env.lifecycle.reserve("a@example.com", "standard", 1).await.unwrap();
    let paid = env
        .lifecycle
        .confirm_payment(outcome.reservation().ticket_id)
        .await
        .unwrap();
    let ticket_id = paid.id;
    let token = paid.credential.unwrap().token;

    let handles = (0..8).map(|_| {
        let lifecycle = env.lifecycle.clone();
        let token = token.clone();
        tokio::spawn(async move { lifecycle.check_in(ticket_id, &token).await })
    });
    let results: Vec<_> = join_all(handles).await.into_iter().map(Result::unwrap).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results.iter().filter(|r| matches!(r, Err(TicketError::AlreadyCheckedIn))).count(),
        7
    );
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

    #[test]
    fn prop_committed_never_exceeds_capacity(
        capacity in 1u32..30,
        quantities in proptest::collection::vec(1u32..=10, 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        let (granted, committed_total) = runtime.block_on(async {
            let env = create_test_env(capacity);
            let requests = quantities
                .iter()
                .enumerate()
                .map(|(i, q)| (format!("p{i}@example.com"), *q))
                .collect();
            let results = reserve_all(&env.lifecycle, requests).await;
            let granted: u32 = results
                .iter()
                .filter_map(|r| r.as_ref().ok())
                .map(|o| o.reservation().quantity)
                .sum();
            (granted, committed(&env.store).await)
        });

        prop_assert!(granted <= capacity);
        prop_assert_eq!(granted, committed_total);
    }
}
