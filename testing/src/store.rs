//! In-memory [`TicketStore`] for tests.
//!
//! Every method takes the same lock for its whole body, so each contract
//! operation is atomic with respect to every other. That is the property the
//! concurrency tests lean on; the `PostgreSQL` store gets the same guarantee
//! from row locks and conditional writes.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::ready;
use std::sync::{Arc, Mutex};
use ticketgate_core::{
    BuyerIdentity, CapacityUpdate, CommitScope, Money, ReservationInsert, StoreError, StoreFuture,
    Ticket, TicketId, TicketState, TicketStore, TicketType, TicketTypeId,
};

#[derive(Debug, Default)]
struct State {
    types: BTreeMap<TicketTypeId, TicketType>,
    tickets: HashMap<TicketId, Ticket>,
    failing_deletes: HashSet<TicketId>,
    unavailable: bool,
}

impl State {
    fn committed(&self, type_id: &TicketTypeId, scope: CommitScope) -> u32 {
        let states = scope.states();
        self.tickets
            .values()
            .filter(|t| &t.type_id == type_id && states.contains(&t.state))
            .fold(0u32, |acc, t| acc.saturating_add(t.quantity))
    }

    fn by_buyer(&self, buyer: &BuyerIdentity, state: TicketState) -> Option<&Ticket> {
        self.tickets
            .values()
            .find(|t| &t.buyer == buyer && t.state == state)
    }
}

/// Thread-safe in-memory ticket store.
///
/// Clones share state. Faults can be injected with
/// [`InMemoryTicketStore::set_unavailable`] and
/// [`InMemoryTicketStore::fail_deletes_for`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryTicketStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryTicketStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with ticket types
    #[must_use]
    pub fn with_types(types: impl IntoIterator<Item = TicketType>) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.lock() {
            for ticket_type in types {
                state.types.insert(ticket_type.type_id.clone(), ticket_type);
            }
        }
        store
    }

    /// Make every subsequent call fail with [`StoreError::Database`]
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable = unavailable;
        }
    }

    /// Make deletes of `id` fail, leaving the ticket in place
    pub fn fail_deletes_for(&self, id: TicketId) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_deletes.insert(id);
        }
    }

    /// Insert or overwrite a ticket, bypassing every guard.
    ///
    /// For arranging fixtures such as backdated reservations.
    pub fn put_ticket(&self, ticket: Ticket) {
        if let Ok(mut state) = self.state.lock() {
            state.tickets.insert(ticket.id, ticket);
        }
    }

    /// Number of stored tickets
    #[must_use]
    pub fn ticket_count(&self) -> usize {
        self.state.lock().map(|s| s.tickets.len()).unwrap_or_default()
    }

    fn with_state<T, F>(&self, f: F) -> StoreFuture<'_, T>
    where
        T: Send + 'static,
        F: FnOnce(&mut State) -> Result<T, StoreError>,
    {
        let result = match self.state.lock() {
            Ok(state) if state.unavailable => {
                Err(StoreError::Database("store unavailable".to_string()))
            }
            Ok(mut state) => f(&mut state),
            Err(_) => Err(StoreError::Database("store lock poisoned".to_string())),
        };
        Box::pin(ready(result))
    }
}

impl TicketStore for InMemoryTicketStore {
    fn ticket_type(&self, type_id: TicketTypeId) -> StoreFuture<'_, Option<TicketType>> {
        self.with_state(move |state| Ok(state.types.get(&type_id).cloned()))
    }

    fn ticket_types(&self) -> StoreFuture<'_, Vec<TicketType>> {
        self.with_state(|state| Ok(state.types.values().cloned().collect()))
    }

    fn insert_ticket_type(&self, ticket_type: TicketType) -> StoreFuture<'_, bool> {
        self.with_state(move |state| {
            if state.types.contains_key(&ticket_type.type_id) {
                return Ok(false);
            }
            state.types.insert(ticket_type.type_id.clone(), ticket_type);
            Ok(true)
        })
    }

    fn update_ticket_type(
        &self,
        type_id: TicketTypeId,
        total_capacity: u32,
        unit_price: Option<Money>,
    ) -> StoreFuture<'_, CapacityUpdate> {
        self.with_state(move |state| {
            let sold = state.committed(&type_id, CommitScope::PaidOnly);
            let Some(row) = state.types.get_mut(&type_id) else {
                return Ok(CapacityUpdate::NotFound);
            };
            if total_capacity < sold {
                return Ok(CapacityUpdate::BelowSold { sold });
            }
            row.total_capacity = total_capacity;
            if let Some(price) = unit_price {
                row.unit_price = price;
            }
            Ok(CapacityUpdate::Updated(row.clone()))
        })
    }

    fn committed_quantity(
        &self,
        type_id: TicketTypeId,
        scope: CommitScope,
    ) -> StoreFuture<'_, u32> {
        self.with_state(move |state| Ok(state.committed(&type_id, scope)))
    }

    fn insert_reservation(&self, ticket: Ticket) -> StoreFuture<'_, ReservationInsert> {
        self.with_state(move |state| {
            if let Some(paid) = state.by_buyer(&ticket.buyer, TicketState::Paid) {
                return Ok(ReservationInsert::BuyerHasPaid(paid.clone()));
            }
            if let Some(pending) = state.by_buyer(&ticket.buyer, TicketState::Reserved) {
                return Ok(ReservationInsert::BuyerHasPending(pending.clone()));
            }
            let Some(capacity) = state.types.get(&ticket.type_id).map(|t| t.total_capacity) else {
                return Ok(ReservationInsert::UnknownType);
            };
            let committed = state.committed(&ticket.type_id, CommitScope::ReservedAndPaid);
            let remaining = capacity.saturating_sub(committed);
            if ticket.quantity > remaining {
                return Ok(ReservationInsert::OutOfStock { remaining });
            }
            state.tickets.insert(ticket.id, ticket.clone());
            Ok(ReservationInsert::Inserted(ticket))
        })
    }

    fn ticket(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        self.with_state(move |state| Ok(state.tickets.get(&id).cloned()))
    }

    fn find_by_buyer(
        &self,
        buyer: BuyerIdentity,
        ticket_state: TicketState,
    ) -> StoreFuture<'_, Option<Ticket>> {
        self.with_state(move |state| Ok(state.by_buyer(&buyer, ticket_state).cloned()))
    }

    fn list_tickets(&self) -> StoreFuture<'_, Vec<Ticket>> {
        self.with_state(|state| {
            let mut tickets: Vec<Ticket> = state.tickets.values().cloned().collect();
            tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(tickets)
        })
    }

    fn replace_ticket(&self, next: Ticket, expected_version: u64) -> StoreFuture<'_, bool> {
        self.with_state(move |state| match state.tickets.get_mut(&next.id) {
            Some(current) if current.version == expected_version => {
                *current = next;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    fn expired_reservations(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, Vec<Ticket>> {
        self.with_state(move |state| {
            let mut expired: Vec<Ticket> = state
                .tickets
                .values()
                .filter(|t| t.is_expired_reservation(cutoff))
                .cloned()
                .collect();
            expired.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(expired)
        })
    }

    fn delete_expired_reservation(
        &self,
        id: TicketId,
        cutoff: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Ticket>> {
        self.with_state(move |state| {
            if state.failing_deletes.contains(&id) {
                return Err(StoreError::Database(format!("delete of {id} failed")));
            }
            let still_expired = state
                .tickets
                .get(&id)
                .is_some_and(|t| t.is_expired_reservation(cutoff));
            if !still_expired {
                return Ok(None);
            }
            Ok(state.tickets.remove(&id))
        })
    }

    fn delete_ticket(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        self.with_state(move |state| {
            if state.failing_deletes.contains(&id) {
                return Err(StoreError::Database(format!("delete of {id} failed")));
            }
            Ok(state.tickets.remove(&id))
        })
    }
}
