//! # Ticketgate Core
//!
//! Domain types and collaborator contracts for the Ticketgate ticket lifecycle.
//!
//! This crate contains no I/O. It provides:
//!
//! - **Types**: tickets, ticket types, money, buyer identities, service kinds
//! - **Errors**: the user-facing outcome taxonomy ([`TicketError`]) and the
//!   storage failure type ([`StoreError`])
//! - **Transitions**: pure snapshot transitions on [`Ticket`] (payment,
//!   check-in, service redemption). Each produces a new snapshot; nothing is
//!   mutated in place.
//! - **Contracts**: [`TicketStore`], [`ActivityRecorder`], [`CredentialDelivery`]
//!   and [`environment::Clock`], injected into the lifecycle manager
//! - **Credentials**: the keyed [`CredentialSigner`] and the QR
//!   [`CredentialPayload`]
//!
//! ## Lifecycle
//!
//! ```text
//! reserve ──▶ Reserved ──confirm──▶ Paid ──check-in──▶ Paid + checked_in_at
//!                │                                         │
//!             sweep (expired)                     redeem(food|drink|store)
//!                ▼                                         ▼
//!            deleted, stock released            service_redemptions[kind]
//! ```
//!
//! Committed stock is never stored as a counter: it is always the live sum of
//! `quantity` over Reserved and Paid tickets of a type.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod activity;
pub mod credential;
pub mod error;
pub mod store;
pub mod types;

pub use activity::{
    ADMIN_SUBJECT, ActivityAction, ActivityError, ActivityEvent, ActivityFuture, ActivityRecorder,
    Actor,
};
pub use credential::{
    CredentialDelivery, CredentialError, CredentialPayload, CredentialSigner, DeliveryError,
};
pub use error::{StoreError, TicketError};
pub use store::{CapacityUpdate, CommitScope, ReservationInsert, StoreFuture, TicketStore};
pub use types::*;

/// Environment module - dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// The lifecycle manager and the expiry sweeper read time exclusively
    /// through this trait, so tests can age reservations without sleeping.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
