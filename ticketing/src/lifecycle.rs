//! Ticket lifecycle manager.
//!
//! Owns every decision about a ticket: admission of a reservation, payment
//! confirmation with credential issuance, gate check-in, and per-service
//! redemption. The store only provides atomic primitives; the manager decides.
//!
//! # Transitions
//!
//! | Transition | Failure |
//! |---|---|
//! | create Reserved | `AlreadyPurchased`, `OutOfStock`, `PendingExists` (returned as success) |
//! | Reserved -> Paid | `TicketNotFound` (missing, expired, or already paid) |
//! | Paid -> checked-in | `InvalidCredential`, `AlreadyCheckedIn`, `NotPaid` |
//! | checked-in -> redeemed(kind) | `NotCheckedIn`, `AlreadyRedeemed`, `InvalidServiceKind` |
//!
//! # Concurrency
//!
//! Every post-creation transition is a compare-and-swap on the ticket
//! version. When the swap loses, the manager re-reads the ticket and
//! re-evaluates the guard from scratch, so a concurrent transition is never
//! applied twice and a ticket deleted by the sweeper reads as `TicketNotFound`.

use crate::ledger::StockLedger;
use crate::metrics;
use chrono::Duration;
use std::sync::Arc;
use ticketgate_core::environment::Clock;
use ticketgate_core::{
    ActivityAction, ActivityEvent, ActivityRecorder, Actor, BuyerIdentity, Credential,
    CredentialDelivery, CredentialPayload, CredentialSigner, Reservation, ReservationInsert,
    ReservationOutcome, ServiceKind, Ticket, TicketError, TicketId, TicketState, TicketStatus,
    TicketStore, TicketTypeId,
};
use tracing::{debug, error, info, warn};

/// Upper bound on compare-and-swap rounds for one transition.
const MAX_TRANSITION_ATTEMPTS: usize = 8;

/// How a service redemption is authorized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedemptionAuth {
    /// A scanned credential token; verified like a gate scan.
    Credential(String),
    /// Staff redeemed manually after checking the buyer in person.
    StaffManual,
}

/// Lifecycle tunables.
#[derive(Clone, Debug)]
pub struct LifecycleSettings {
    /// How long an unpaid reservation holds stock
    pub expiry_window: Duration,
    /// Largest quantity one reservation may request
    pub max_tickets_per_order: u32,
    /// Event name embedded in credential payloads
    pub event_name: String,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            expiry_window: Duration::minutes(15),
            max_tickets_per_order: 10,
            event_name: "Ticketgate Festival".to_string(),
        }
    }
}

/// Collaborators injected into [`TicketLifecycle`].
#[derive(Clone)]
pub struct LifecycleDeps {
    /// Durable ticket storage
    pub store: Arc<dyn TicketStore>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Activity trail sink
    pub recorder: Arc<dyn ActivityRecorder>,
    /// Credential hand-off after payment
    pub delivery: Arc<dyn CredentialDelivery>,
}

/// The ticket lifecycle state machine.
#[derive(Clone)]
pub struct TicketLifecycle {
    store: Arc<dyn TicketStore>,
    ledger: StockLedger,
    signer: CredentialSigner,
    clock: Arc<dyn Clock>,
    recorder: Arc<dyn ActivityRecorder>,
    delivery: Arc<dyn CredentialDelivery>,
    settings: LifecycleSettings,
}

impl TicketLifecycle {
    /// Create a lifecycle manager.
    #[must_use]
    pub fn new(deps: LifecycleDeps, signer: CredentialSigner, settings: LifecycleSettings) -> Self {
        Self {
            ledger: StockLedger::new(Arc::clone(&deps.store)),
            store: deps.store,
            signer,
            clock: deps.clock,
            recorder: deps.recorder,
            delivery: deps.delivery,
            settings,
        }
    }

    /// The stock ledger over the same store.
    #[must_use]
    pub const fn ledger(&self) -> &StockLedger {
        &self.ledger
    }

    /// Lifecycle tunables.
    #[must_use]
    pub const fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reservation
    // ═══════════════════════════════════════════════════════════════════════

    /// Reserve `quantity` tickets of `type_id` for `buyer`.
    ///
    /// A buyer who already holds a reservation gets that same reservation
    /// back as [`ReservationOutcome::PendingExists`]; no extra stock is taken.
    ///
    /// # Errors
    ///
    /// - [`TicketError::InvalidBuyerIdentity`] for an empty buyer
    /// - [`TicketError::InvalidQuantity`] for zero or more than the per-order limit
    /// - [`TicketError::AlreadyPurchased`] if the buyer holds a Paid ticket
    /// - [`TicketError::UnknownTicketType`] if the type does not exist
    /// - [`TicketError::OutOfStock`] if `quantity` exceeds what remains
    /// - [`TicketError::Storage`] on storage failure
    #[tracing::instrument(skip(self, buyer), fields(buyer = tracing::field::Empty))]
    pub async fn reserve(
        &self,
        buyer: &str,
        type_id: &str,
        quantity: u32,
    ) -> Result<ReservationOutcome, TicketError> {
        let buyer = BuyerIdentity::parse(buyer)?;
        tracing::Span::current().record("buyer", buyer.as_str());
        let type_id = TicketTypeId::new(type_id);

        if quantity == 0 || quantity > self.settings.max_tickets_per_order {
            metrics::record_reservation("rejected");
            debug!(quantity, max = self.settings.max_tickets_per_order, "Quantity rejected");
            return Err(TicketError::InvalidQuantity);
        }

        // Answer repeat requests without touching stock.
        if let Some(paid) = self.store.find_by_buyer(buyer.clone(), TicketState::Paid).await? {
            return Err(self.already_purchased(&paid));
        }
        if let Some(pending) = self
            .store
            .find_by_buyer(buyer.clone(), TicketState::Reserved)
            .await?
        {
            return Ok(self.pending_exists(&pending));
        }

        let ticket_type = self.ledger.ticket_type(&type_id).await?;
        let candidate =
            Ticket::reserve(TicketId::new(), buyer, &ticket_type, quantity, self.clock.now())?;

        match self.store.insert_reservation(candidate).await? {
            ReservationInsert::Inserted(ticket) => {
                metrics::record_reservation("created");
                info!(
                    ticket_id = %ticket.id,
                    buyer = %ticket.buyer,
                    type_id = %ticket.type_id,
                    quantity = ticket.quantity,
                    amount = %ticket.total_price,
                    "Reservation created"
                );
                self.record(&ticket, ActivityAction::ReservationCreated, Actor::System).await;
                // Refresh the gauge; the reservation already committed.
                if let Err(e) = self.ledger.available_for(&ticket.type_id).await {
                    warn!(error = ?e, "Failed to refresh stock gauge");
                }
                Ok(ReservationOutcome::Created(Reservation::of(
                    &ticket,
                    self.settings.expiry_window,
                )))
            }
            ReservationInsert::BuyerHasPaid(paid) => Err(self.already_purchased(&paid)),
            ReservationInsert::BuyerHasPending(pending) => Ok(self.pending_exists(&pending)),
            ReservationInsert::OutOfStock { remaining } => {
                metrics::record_reservation("out_of_stock");
                debug!(type_id = %type_id, requested = quantity, remaining, "Out of stock");
                Err(TicketError::OutOfStock { requested: quantity, remaining })
            }
            ReservationInsert::UnknownType => {
                Err(TicketError::UnknownTicketType(type_id.to_string()))
            }
        }
    }

    fn already_purchased(&self, paid: &Ticket) -> TicketError {
        metrics::record_reservation("rejected");
        debug!(ticket_id = %paid.id, buyer = %paid.buyer, "Buyer already purchased");
        TicketError::AlreadyPurchased {
            type_id: paid.type_id.clone(),
            quantity: paid.quantity,
            purchased_at: paid.created_at,
        }
    }

    fn pending_exists(&self, pending: &Ticket) -> ReservationOutcome {
        metrics::record_reservation("pending");
        debug!(ticket_id = %pending.id, buyer = %pending.buyer, "Returning existing reservation");
        ReservationOutcome::PendingExists(Reservation::of(pending, self.settings.expiry_window))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Payment
    // ═══════════════════════════════════════════════════════════════════════

    /// Confirm payment for a reserved ticket and issue its credential.
    ///
    /// The payment signal is trusted. After the transition commits, the
    /// credential payload is handed to the delivery collaborator exactly once;
    /// a delivery failure is logged and does not undo the payment.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketNotFound`] if the ticket is missing, expired, or
    ///   no longer Reserved (including a concurrent confirmation that won)
    /// - [`TicketError::Storage`] on storage failure
    #[tracing::instrument(skip(self), fields(ticket_id = %ticket_id))]
    pub async fn confirm_payment(&self, ticket_id: TicketId) -> Result<Ticket, TicketError> {
        let paid = self
            .transition(ticket_id, |ticket| {
                let credential = Credential {
                    token: self.signer.sign(&ticket.id, &ticket.buyer),
                    issued_at: self.clock.now(),
                };
                ticket.confirm_payment(credential)
            })
            .await?;

        metrics::record_payment_confirmed(paid.quantity);
        info!(
            ticket_id = %paid.id,
            buyer = %paid.buyer,
            type_id = %paid.type_id,
            quantity = paid.quantity,
            "Payment confirmed, credential issued"
        );
        self.record(&paid, ActivityAction::PaymentConfirmed, Actor::System).await;

        if let Some(payload) =
            CredentialPayload::for_ticket(self.settings.event_name.clone(), &paid)
        {
            if let Err(e) = self.delivery.deliver(payload).await {
                error!(ticket_id = %paid.id, error = %e, "Credential delivery failed");
            }
        }

        Ok(paid)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Venue
    // ═══════════════════════════════════════════════════════════════════════

    /// Gate check-in with a scanned credential token.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketNotFound`] if the ticket does not exist
    /// - [`TicketError::NotPaid`] if it is still Reserved
    /// - [`TicketError::InvalidCredential`] if the token does not verify
    /// - [`TicketError::AlreadyCheckedIn`] on a repeat scan
    /// - [`TicketError::Storage`] on storage failure
    #[tracing::instrument(skip(self, token), fields(ticket_id = %ticket_id))]
    pub async fn check_in(&self, ticket_id: TicketId, token: &str) -> Result<Ticket, TicketError> {
        let ticket = self.load(ticket_id).await?;
        self.verify_presented(&ticket, token)?;

        let at = self.clock.now();
        let checked_in = self.transition(ticket_id, |ticket| ticket.check_in(at)).await?;

        metrics::record_check_in();
        info!(ticket_id = %checked_in.id, buyer = %checked_in.buyer, "Gate check-in");
        self.record(&checked_in, ActivityAction::CheckedIn, Actor::Staff).await;
        Ok(checked_in)
    }

    /// Redeem one service entitlement of a checked-in ticket.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketNotFound`] if the ticket does not exist
    /// - [`TicketError::NotPaid`] if it is still Reserved
    /// - [`TicketError::InvalidCredential`] if a presented token does not verify
    /// - [`TicketError::NotCheckedIn`] before gate check-in
    /// - [`TicketError::AlreadyRedeemed`] if `kind` was already used
    /// - [`TicketError::Storage`] on storage failure
    #[tracing::instrument(skip(self, auth), fields(ticket_id = %ticket_id, service = %kind))]
    pub async fn redeem(
        &self,
        ticket_id: TicketId,
        kind: ServiceKind,
        auth: RedemptionAuth,
    ) -> Result<Ticket, TicketError> {
        let ticket = self.load(ticket_id).await?;
        if let RedemptionAuth::Credential(token) = &auth {
            self.verify_presented(&ticket, token)?;
        }

        let at = self.clock.now();
        let redeemed = self.transition(ticket_id, |ticket| ticket.redeem(kind, at)).await?;

        metrics::record_redemption(kind);
        info!(
            ticket_id = %redeemed.id,
            buyer = %redeemed.buyer,
            service = %kind,
            manual = matches!(auth, RedemptionAuth::StaffManual),
            "Service redeemed"
        );
        self.record(&redeemed, ActivityAction::ServiceRedeemed { service: kind }, Actor::Staff)
            .await;
        Ok(redeemed)
    }

    /// [`Self::redeem`] with the service kind given by name.
    ///
    /// # Errors
    ///
    /// [`TicketError::InvalidServiceKind`] for an unknown name, otherwise as
    /// [`Self::redeem`].
    pub async fn redeem_named(
        &self,
        ticket_id: TicketId,
        kind: &str,
        auth: RedemptionAuth,
    ) -> Result<Ticket, TicketError> {
        let kind = kind.parse::<ServiceKind>()?;
        self.redeem(ticket_id, kind, auth).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    /// Load a ticket.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketNotFound`] if it does not exist
    /// - [`TicketError::Storage`] on storage failure
    pub async fn ticket(&self, ticket_id: TicketId) -> Result<Ticket, TicketError> {
        self.load(ticket_id).await
    }

    /// State, creation time, and expiry deadline of a ticket.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketNotFound`] if it does not exist (or already expired)
    /// - [`TicketError::Storage`] on storage failure
    pub async fn status(&self, ticket_id: TicketId) -> Result<TicketStatus, TicketError> {
        let ticket = self.load(ticket_id).await?;
        Ok(TicketStatus {
            state: ticket.state,
            created_at: ticket.created_at,
            expires_at: ticket.expires_at(self.settings.expiry_window),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════

    async fn load(&self, ticket_id: TicketId) -> Result<Ticket, TicketError> {
        self.store
            .ticket(ticket_id)
            .await?
            .ok_or(TicketError::TicketNotFound)
    }

    /// Check a presented token. Rejections are generic to the caller and a
    /// `warn` in the logs.
    fn verify_presented(&self, ticket: &Ticket, token: &str) -> Result<(), TicketError> {
        if ticket.state != TicketState::Paid {
            return Err(TicketError::NotPaid);
        }
        if self.signer.verify(token, &ticket.id, &ticket.buyer) {
            return Ok(());
        }
        metrics::record_credential_rejected();
        warn!(ticket_id = %ticket.id, "Credential rejected");
        Err(TicketError::InvalidCredential)
    }

    /// Apply `step` with compare-and-swap, re-reading and re-evaluating the
    /// guard whenever another writer got there first.
    async fn transition<F>(&self, ticket_id: TicketId, step: F) -> Result<Ticket, TicketError>
    where
        F: Fn(&Ticket) -> Result<Ticket, TicketError>,
    {
        for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
            let current = self.load(ticket_id).await?;
            let next = step(&current)?;
            if self.store.replace_ticket(next.clone(), current.version).await? {
                return Ok(next);
            }
            debug!(ticket_id = %ticket_id, attempt, "Concurrent update, re-evaluating");
        }
        error!(ticket_id = %ticket_id, "Transition kept losing compare-and-swap");
        Err(TicketError::Storage(format!(
            "ticket {ticket_id} contended for {MAX_TRANSITION_ATTEMPTS} attempts"
        )))
    }

    async fn record(&self, ticket: &Ticket, action: ActivityAction, actor: Actor) {
        let event = ActivityEvent::new(
            self.clock.now(),
            action,
            ticket.buyer.as_str(),
            actor,
            Some(ticket.id),
        );
        if let Err(e) = self.recorder.record(event).await {
            warn!(ticket_id = %ticket.id, error = %e, "Failed to record activity");
        }
    }
}
