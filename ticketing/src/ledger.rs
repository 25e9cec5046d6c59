//! Stock ledger: capacity, price, and live committed counts per ticket type.
//!
//! Committed quantity is never a stored counter. `remaining` is always
//! `total_capacity - sum(quantity of Reserved and Paid tickets)`, recomputed
//! from ticket rows on every call and clamped at zero for reporting.
//!
//! Admission itself (`reserve`) is not done here: it has to be one atomic
//! step with the ticket insert, so it lives in
//! [`TicketStore::insert_reservation`].

use crate::metrics;
use futures::future::try_join_all;
use std::sync::Arc;
use ticketgate_core::{
    CapacityUpdate, CommitScope, Money, StockSummary, Ticket, TicketError, TicketStore, TicketType,
    TicketTypeId,
};
use tracing::{debug, info};

/// Read and admin-write access to ticket type stock.
#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn TicketStore>,
}

impl StockLedger {
    /// Create a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Load a ticket type.
    ///
    /// # Errors
    ///
    /// - [`TicketError::UnknownTicketType`] if it does not exist
    /// - [`TicketError::Storage`] on storage failure
    pub async fn ticket_type(&self, type_id: &TicketTypeId) -> Result<TicketType, TicketError> {
        self.store
            .ticket_type(type_id.clone())
            .await?
            .ok_or_else(|| TicketError::UnknownTicketType(type_id.to_string()))
    }

    /// `total_capacity - committed(Reserved + Paid)`, clamped at zero.
    ///
    /// # Errors
    ///
    /// - [`TicketError::UnknownTicketType`] if the type does not exist
    /// - [`TicketError::Storage`] on storage failure
    pub async fn available_for(&self, type_id: &TicketTypeId) -> Result<u32, TicketError> {
        let ticket_type = self.ticket_type(type_id).await?;
        let committed = self
            .store
            .committed_quantity(type_id.clone(), CommitScope::ReservedAndPaid)
            .await?;
        let remaining = ticket_type.total_capacity.saturating_sub(committed);
        metrics::update_stock_remaining(type_id, remaining);
        Ok(remaining)
    }

    /// Note that `ticket` no longer holds stock.
    ///
    /// The store already removed the row, which is what releases the
    /// quantity; this refreshes the gauge and logs the release. Called exactly
    /// once per destroyed ticket.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Storage`] if the refreshed count cannot be read.
    pub async fn release(&self, ticket: &Ticket) -> Result<u32, TicketError> {
        let remaining = self.available_for(&ticket.type_id).await?;
        debug!(
            ticket_id = %ticket.id,
            type_id = %ticket.type_id,
            quantity = ticket.quantity,
            remaining,
            "Stock released"
        );
        Ok(remaining)
    }

    /// Per-type stock figures, ordered by type id.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Storage`] on storage failure.
    pub async fn summary(&self) -> Result<Vec<StockSummary>, TicketError> {
        let types = self.store.ticket_types().await?;
        let rows =
            try_join_all(types.into_iter().map(|ticket_type| self.summarize(ticket_type))).await?;
        Ok(rows)
    }

    async fn summarize(&self, ticket_type: TicketType) -> Result<StockSummary, TicketError> {
        let sold = self
            .store
            .committed_quantity(ticket_type.type_id.clone(), CommitScope::PaidOnly)
            .await?;
        let committed = self
            .store
            .committed_quantity(ticket_type.type_id.clone(), CommitScope::ReservedAndPaid)
            .await?;
        let remaining = ticket_type.total_capacity.saturating_sub(committed);
        metrics::update_stock_remaining(&ticket_type.type_id, remaining);

        Ok(StockSummary {
            type_id: ticket_type.type_id,
            unit_price: ticket_type.unit_price,
            total_capacity: ticket_type.total_capacity,
            sold,
            reserved: committed.saturating_sub(sold),
            remaining,
        })
    }

    /// Add a ticket type.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketTypeExists`] if the id is taken
    /// - [`TicketError::Storage`] on storage failure
    pub async fn add_ticket_type(
        &self,
        ticket_type: TicketType,
    ) -> Result<TicketType, TicketError> {
        let type_id = ticket_type.type_id.clone();
        if !self.store.insert_ticket_type(ticket_type.clone()).await? {
            return Err(TicketError::TicketTypeExists(type_id.to_string()));
        }
        metrics::update_stock_remaining(&type_id, ticket_type.total_capacity);
        info!(
            type_id = %type_id,
            unit_price = %ticket_type.unit_price,
            total_capacity = ticket_type.total_capacity,
            "Ticket type added"
        );
        Ok(ticket_type)
    }

    /// Change capacity and optionally price.
    ///
    /// # Errors
    ///
    /// - [`TicketError::CapacityBelowSold`] if `total_capacity` is below the Paid quantity
    /// - [`TicketError::UnknownTicketType`] if the type does not exist
    /// - [`TicketError::Storage`] on storage failure
    pub async fn update_capacity(
        &self,
        type_id: &TicketTypeId,
        total_capacity: u32,
        unit_price: Option<Money>,
    ) -> Result<TicketType, TicketError> {
        match self
            .store
            .update_ticket_type(type_id.clone(), total_capacity, unit_price)
            .await?
        {
            CapacityUpdate::Updated(updated) => {
                info!(
                    type_id = %type_id,
                    total_capacity,
                    unit_price = %updated.unit_price,
                    "Ticket type updated"
                );
                self.available_for(type_id).await?;
                Ok(updated)
            }
            CapacityUpdate::NotFound => Err(TicketError::UnknownTicketType(type_id.to_string())),
            CapacityUpdate::BelowSold { sold } => {
                debug!(type_id = %type_id, total_capacity, sold, "Capacity update rejected");
                Err(TicketError::CapacityBelowSold { sold })
            }
        }
    }
}
