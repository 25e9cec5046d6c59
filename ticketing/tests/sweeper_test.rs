//! Expiry sweeper tests.
//!
//! Run with: `cargo test --test sweeper_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use ticketgate_core::environment::Clock;
use ticketgate_core::{
    ActivityAction, Actor, BuyerIdentity, Credential, Money, Ticket, TicketId, TicketStore,
    TicketType, TicketTypeId,
};
use ticketgate_testing::{InMemoryActivityRecorder, InMemoryTicketStore, MockClock, test_clock};
use ticketing::{ExpirySweeper, StockLedger};
use tokio::sync::broadcast;

const WINDOW_MINUTES: i64 = 15;

struct TestEnv {
    sweeper: ExpirySweeper,
    store: InMemoryTicketStore,
    ledger: StockLedger,
    clock: MockClock,
    recorder: InMemoryActivityRecorder,
}

fn create_test_env(interval: std::time::Duration) -> TestEnv {
    let store = InMemoryTicketStore::with_types([vip()]);
    let clock = MockClock::starting_at(test_clock().now());
    let recorder = InMemoryActivityRecorder::new();
    let sweeper = ExpirySweeper::new(
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        Arc::new(recorder.clone()),
        Duration::minutes(WINDOW_MINUTES),
        interval,
    );
    let ledger = StockLedger::new(Arc::new(store.clone()));
    TestEnv { sweeper, store, ledger, clock, recorder }
}

fn vip() -> TicketType {
    TicketType::new("vip", Money::new(1_000_000), 20)
}

fn reserved(buyer: &str, quantity: u32, created_at: DateTime<Utc>) -> Ticket {
    Ticket::reserve(
        TicketId::new(),
        BuyerIdentity::parse(buyer).unwrap(),
        &vip(),
        quantity,
        created_at,
    )
    .unwrap()
}

async fn remaining(env: &TestEnv) -> u32 {
    env.ledger.available_for(&TicketTypeId::new("vip")).await.unwrap()
}

#[tokio::test]
async fn test_sweep_reclaims_expired_stock() {
    let env = create_test_env(std::time::Duration::from_secs(60));
    let start = env.clock.now();
    let old = reserved("old@example.com", 3, start);
    let fresh = reserved("fresh@example.com", 2, start + Duration::minutes(10));
    env.store.put_ticket(old.clone());
    env.store.put_ticket(fresh.clone());
    assert_eq!(remaining(&env).await, 15);

    env.clock.advance(Duration::minutes(WINDOW_MINUTES + 1));
    let report = env.sweeper.sweep_once().await.unwrap();

    assert_eq!(report.expired, vec![old.id]);
    assert_eq!(report.failed, 0);
    assert_eq!(remaining(&env).await, 18);
    assert!(env.store.ticket(old.id).await.unwrap().is_none());
    assert!(env.store.ticket(fresh.id).await.unwrap().is_some());

    let events = env.recorder.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, ActivityAction::ReservationExpired);
    assert_eq!(events[0].subject, "old@example.com");
    assert_eq!(events[0].actor, Actor::System);
    assert_eq!(events[0].ticket_id, Some(old.id));
}

#[tokio::test]
async fn test_reservation_exactly_at_deadline_is_kept() {
    let env = create_test_env(std::time::Duration::from_secs(60));
    let ticket = reserved("edge@example.com", 1, env.clock.now());
    env.store.put_ticket(ticket.clone());

    env.clock.advance(Duration::minutes(WINDOW_MINUTES));
    let report = env.sweeper.sweep_once().await.unwrap();

    assert!(report.expired.is_empty());
    assert!(env.store.ticket(ticket.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_paid_tickets_are_never_swept() {
    let env = create_test_env(std::time::Duration::from_secs(60));
    let paid = reserved("paid@example.com", 4, env.clock.now())
        .confirm_payment(Credential { token: "t".to_string(), issued_at: env.clock.now() })
        .unwrap();
    env.store.put_ticket(paid.clone());

    env.clock.advance(Duration::hours(6));
    let report = env.sweeper.sweep_once().await.unwrap();

    assert!(report.expired.is_empty());
    assert_eq!(env.store.ticket(paid.id).await.unwrap(), Some(paid));
    assert_eq!(remaining(&env).await, 16);
}

#[tokio::test]
async fn test_window_beyond_calendar_expires_nothing() {
    let env = create_test_env(std::time::Duration::from_secs(60));
    let ticket = reserved("patient@example.com", 1, env.clock.now());
    env.store.put_ticket(ticket.clone());
    let sweeper = ExpirySweeper::new(
        Arc::new(env.store.clone()),
        Arc::new(env.clock.clone()),
        Arc::new(env.recorder.clone()),
        Duration::MAX,
        std::time::Duration::from_secs(60),
    );

    env.clock.advance(Duration::days(365));
    let report = sweeper.sweep_once().await.unwrap();

    assert!(report.expired.is_empty());
    assert!(env.store.ticket(ticket.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_run() {
    let env = create_test_env(std::time::Duration::from_secs(60));
    let start = env.clock.now();
    let stuck = reserved("stuck@example.com", 1, start);
    let first = reserved("first@example.com", 1, start + Duration::seconds(1));
    let second = reserved("second@example.com", 1, start + Duration::seconds(2));
    for ticket in [&stuck, &first, &second] {
        env.store.put_ticket(ticket.clone());
    }
    env.store.fail_deletes_for(stuck.id);

    env.clock.advance(Duration::minutes(WINDOW_MINUTES + 1));
    let report = env.sweeper.sweep_once().await.unwrap();

    assert_eq!(report.expired, vec![first.id, second.id]);
    assert_eq!(report.failed, 1);
    assert!(env.store.ticket(stuck.id).await.unwrap().is_some());
    assert_eq!(env.recorder.events().len(), 2);
}

#[tokio::test]
async fn test_unavailable_store_fails_the_run() {
    let env = create_test_env(std::time::Duration::from_secs(60));
    env.store.set_unavailable(true);

    let result = env.sweeper.sweep_once().await;
    assert!(matches!(result, Err(ref e) if e.is_infrastructure()));
}

#[tokio::test]
async fn test_spawned_sweeper_runs_and_stops_on_shutdown() {
    let env = create_test_env(std::time::Duration::from_millis(10));
    let ticket = reserved("bg@example.com", 2, env.clock.now());
    env.store.put_ticket(ticket.clone());
    env.clock.advance(Duration::minutes(WINDOW_MINUTES + 5));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let store = env.store.clone();
    let handle = env.sweeper.spawn(shutdown_rx);

    // The first tick fires immediately.
    let mut swept = false;
    for _ in 0..100 {
        if store.ticket(ticket.id).await.unwrap().is_none() {
            swept = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(swept);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}
