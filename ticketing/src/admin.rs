//! Administrative operations.
//!
//! Every operation takes the caller's admin token and compares it in constant
//! time against the configured one. With no token configured, every call is
//! [`TicketError::Unauthorized`].

use crate::ledger::StockLedger;
use crate::metrics;
use std::sync::Arc;
use ticketgate_core::environment::Clock;
use ticketgate_core::{
    ADMIN_SUBJECT, ActivityAction, ActivityEvent, ActivityRecorder, Actor, Money, StockSummary,
    Ticket, TicketError, TicketId, TicketStore, TicketType, TicketTypeId,
};
use tracing::{info, warn};

/// Admin operations over tickets and stock.
#[derive(Clone)]
pub struct AdminService {
    token: Option<String>,
    store: Arc<dyn TicketStore>,
    ledger: StockLedger,
    recorder: Arc<dyn ActivityRecorder>,
    clock: Arc<dyn Clock>,
}

impl AdminService {
    /// Create the admin service.
    #[must_use]
    pub fn new(
        token: Option<String>,
        store: Arc<dyn TicketStore>,
        recorder: Arc<dyn ActivityRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
            ledger: StockLedger::new(Arc::clone(&store)),
            store,
            recorder,
            clock,
        }
    }

    fn authorize(&self, presented: &str) -> Result<(), TicketError> {
        let Some(expected) = &self.token else {
            warn!("Admin call rejected: no admin token configured");
            return Err(TicketError::Unauthorized);
        };
        if constant_time_eq::constant_time_eq(expected.as_bytes(), presented.as_bytes()) {
            Ok(())
        } else {
            warn!("Admin call rejected: token mismatch");
            Err(TicketError::Unauthorized)
        }
    }

    /// All tickets, newest first.
    ///
    /// # Errors
    ///
    /// - [`TicketError::Unauthorized`] on a bad token
    /// - [`TicketError::Storage`] on storage failure
    pub async fn list_tickets(&self, token: &str) -> Result<Vec<Ticket>, TicketError> {
        self.authorize(token)?;
        Ok(self.store.list_tickets().await?)
    }

    /// Delete a ticket in any state, releasing its stock.
    ///
    /// # Errors
    ///
    /// - [`TicketError::Unauthorized`] on a bad token
    /// - [`TicketError::TicketNotFound`] if it does not exist
    /// - [`TicketError::Storage`] on storage failure
    #[tracing::instrument(skip(self, token), fields(ticket_id = %ticket_id))]
    pub async fn delete_ticket(
        &self,
        token: &str,
        ticket_id: TicketId,
    ) -> Result<Ticket, TicketError> {
        self.authorize(token)?;
        let deleted = self
            .store
            .delete_ticket(ticket_id)
            .await?
            .ok_or(TicketError::TicketNotFound)?;

        metrics::record_reservation("deleted");
        info!(
            ticket_id = %deleted.id,
            buyer = %deleted.buyer,
            type_id = %deleted.type_id,
            state = %deleted.state,
            quantity = deleted.quantity,
            "Ticket deleted by admin"
        );
        if let Err(e) = self.ledger.release(&deleted).await {
            warn!(ticket_id = %deleted.id, error = %e, "Failed to refresh stock after delete");
        }
        self.record(ActivityAction::TicketDeleted, deleted.buyer.as_str(), Some(deleted.id))
            .await;
        Ok(deleted)
    }

    /// Stock figures per ticket type.
    ///
    /// # Errors
    ///
    /// - [`TicketError::Unauthorized`] on a bad token
    /// - [`TicketError::Storage`] on storage failure
    pub async fn stock_summary(&self, token: &str) -> Result<Vec<StockSummary>, TicketError> {
        self.authorize(token)?;
        self.ledger.summary().await
    }

    /// Up to `limit` activity events, newest first.
    ///
    /// # Errors
    ///
    /// - [`TicketError::Unauthorized`] on a bad token
    /// - [`TicketError::Storage`] if the activity trail cannot be read
    pub async fn recent_activity(
        &self,
        token: &str,
        limit: usize,
    ) -> Result<Vec<ActivityEvent>, TicketError> {
        self.authorize(token)?;
        self.recorder.recent(limit).await.map_err(|e| {
            warn!(error = %e, "Failed to read activity trail");
            TicketError::Storage(e.to_string())
        })
    }

    /// Add a ticket type.
    ///
    /// # Errors
    ///
    /// - [`TicketError::Unauthorized`] on a bad token
    /// - [`TicketError::TicketTypeExists`] if the id is taken
    /// - [`TicketError::Storage`] on storage failure
    pub async fn add_ticket_type(
        &self,
        token: &str,
        ticket_type: TicketType,
    ) -> Result<TicketType, TicketError> {
        self.authorize(token)?;
        let added = self.ledger.add_ticket_type(ticket_type).await?;
        self.record(
            ActivityAction::TicketTypeAdded { type_id: added.type_id.clone() },
            ADMIN_SUBJECT,
            None,
        )
        .await;
        Ok(added)
    }

    /// Change a type's capacity and optionally its price.
    ///
    /// Tickets already reserved keep the price they were reserved at.
    ///
    /// # Errors
    ///
    /// - [`TicketError::Unauthorized`] on a bad token
    /// - [`TicketError::CapacityBelowSold`] if `total_capacity` is below the Paid quantity
    /// - [`TicketError::UnknownTicketType`] if the type does not exist
    /// - [`TicketError::Storage`] on storage failure
    pub async fn update_stock(
        &self,
        token: &str,
        type_id: &TicketTypeId,
        total_capacity: u32,
        unit_price: Option<Money>,
    ) -> Result<TicketType, TicketError> {
        self.authorize(token)?;
        let updated = self.ledger.update_capacity(type_id, total_capacity, unit_price).await?;
        self.record(
            ActivityAction::StockUpdated {
                type_id: updated.type_id.clone(),
                total_capacity: updated.total_capacity,
                unit_price,
            },
            ADMIN_SUBJECT,
            None,
        )
        .await;
        Ok(updated)
    }

    async fn record(&self, action: ActivityAction, subject: &str, ticket_id: Option<TicketId>) {
        let event = ActivityEvent::new(self.clock.now(), action, subject, Actor::Admin, ticket_id);
        if let Err(e) = self.recorder.record(event).await {
            warn!(error = %e, "Failed to record admin activity");
        }
    }
}
