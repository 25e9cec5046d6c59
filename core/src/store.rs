//! Storage contract for tickets and ticket types.
//!
//! The lifecycle manager owns every decision; the store owns atomicity. Each
//! method that can race with another transition is a single conditional
//! operation in the store, never a read in one call followed by a blind write
//! in another:
//!
//! - [`TicketStore::insert_reservation`]: buyer guards, capacity check, and
//!   insert, serialized per ticket type
//! - [`TicketStore::replace_ticket`]: compare-and-swap on the ticket version
//! - [`TicketStore::delete_expired_reservation`]: delete only if still
//!   Reserved and still past the cutoff
//! - [`TicketStore::update_ticket_type`]: capacity change guarded by the Paid
//!   quantity
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures so the store can be shared as
//! `Arc<dyn TicketStore>`. Arguments are owned so the futures only borrow `self`.

use crate::error::StoreError;
use crate::types::{BuyerIdentity, Money, Ticket, TicketId, TicketState, TicketType, TicketTypeId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`TicketStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Which tickets count toward a committed quantity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitScope {
    /// Reserved and Paid: what reservation admission checks against.
    ReservedAndPaid,
    /// Paid only: the floor for admin capacity reductions.
    PaidOnly,
}

impl CommitScope {
    /// States included in this scope.
    #[must_use]
    pub const fn states(&self) -> &'static [TicketState] {
        match self {
            Self::ReservedAndPaid => &[TicketState::Reserved, TicketState::Paid],
            Self::PaidOnly => &[TicketState::Paid],
        }
    }
}

/// Result of [`TicketStore::insert_reservation`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReservationInsert {
    /// The reservation was stored.
    Inserted(Ticket),
    /// The buyer already holds a Paid ticket; nothing was stored.
    BuyerHasPaid(Ticket),
    /// The buyer already holds a Reserved ticket; nothing was stored.
    BuyerHasPending(Ticket),
    /// The requested quantity exceeds what is left.
    OutOfStock {
        /// Remaining quantity at evaluation time
        remaining: u32,
    },
    /// The ticket type does not exist.
    UnknownType,
}

/// Result of [`TicketStore::update_ticket_type`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapacityUpdate {
    /// The row was updated.
    Updated(TicketType),
    /// The ticket type does not exist.
    NotFound,
    /// The new capacity is below the Paid quantity.
    BelowSold {
        /// Paid quantity at evaluation time
        sold: u32,
    },
}

/// Durable ticket and stock storage.
///
/// Implementations must be `Send + Sync`; every committed-quantity read is a
/// fresh aggregate over ticket rows, never a cached counter.
pub trait TicketStore: Send + Sync {
    /// Load a ticket type.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the storage backend fails.
    fn ticket_type(&self, type_id: TicketTypeId) -> StoreFuture<'_, Option<TicketType>>;

    /// List all ticket types ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the storage backend fails.
    fn ticket_types(&self) -> StoreFuture<'_, Vec<TicketType>>;

    /// Insert a ticket type. Returns `false` if the id already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the storage backend fails.
    fn insert_ticket_type(&self, ticket_type: TicketType) -> StoreFuture<'_, bool>;

    /// Set capacity (and optionally price), rejecting a capacity below the
    /// Paid quantity of the type. Guard and write are one atomic step.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the storage backend fails.
    fn update_ticket_type(
        &self,
        type_id: TicketTypeId,
        total_capacity: u32,
        unit_price: Option<Money>,
    ) -> StoreFuture<'_, CapacityUpdate>;

    /// Sum of `quantity` over tickets of `type_id` within `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the storage backend fails.
    fn committed_quantity(&self, type_id: TicketTypeId, scope: CommitScope) -> StoreFuture<'_, u32>;

    /// Atomically admit a Reserved ticket.
    ///
    /// Within one step scoped to the ticket's type: reject if the buyer holds a
    /// Paid or Reserved ticket, reject if `ticket.quantity` exceeds
    /// `total_capacity - committed(ReservedAndPaid)`, otherwise insert.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the storage backend fails.
    fn insert_reservation(&self, ticket: Ticket) -> StoreFuture<'_, ReservationInsert>;

    /// Load a ticket by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the storage backend fails.
    fn ticket(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>>;

    /// Find the buyer's ticket in `state`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the storage backend fails.
    fn find_by_buyer(
        &self,
        buyer: BuyerIdentity,
        state: TicketState,
    ) -> StoreFuture<'_, Option<Ticket>>;

    /// All tickets, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the storage backend fails.
    fn list_tickets(&self) -> StoreFuture<'_, Vec<Ticket>>;

    /// Compare-and-swap: write `next` only if the stored ticket with the same
    /// id is still at `expected_version`. Returns `false` if it changed or was
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the storage backend fails.
    fn replace_ticket(&self, next: Ticket, expected_version: u64) -> StoreFuture<'_, bool>;

    /// Reserved tickets created strictly before `cutoff`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the storage backend fails.
    fn expired_reservations(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, Vec<Ticket>>;

    /// Delete the ticket only if it is still Reserved and created before
    /// `cutoff`. Returns the deleted ticket, or `None` if the predicate no
    /// longer holds (for example it was paid meanwhile).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the storage backend fails.
    fn delete_expired_reservation(
        &self,
        id: TicketId,
        cutoff: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Ticket>>;

    /// Delete a ticket unconditionally. Returns the deleted ticket.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the storage backend fails.
    fn delete_ticket(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>>;
}
