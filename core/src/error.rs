//! Error types for ticket lifecycle and storage operations.

use crate::types::{ServiceKind, TicketTypeId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Outcomes a caller can receive instead of success.
///
/// Every variant except [`TicketError::Storage`] is an expected, user-facing
/// result returned synchronously; none of them is a process fault.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TicketError {
    // ═══════════════════════════════════════════════════════════
    // Reservation
    // ═══════════════════════════════════════════════════════════

    /// The buyer already holds a Paid ticket.
    #[error("Buyer already purchased a ticket ({type_id} x{quantity})")]
    AlreadyPurchased {
        /// Type of the existing ticket
        type_id: TicketTypeId,
        /// Quantity of the existing ticket
        quantity: u32,
        /// When the existing ticket was reserved
        purchased_at: DateTime<Utc>,
    },

    /// Not enough stock left for the requested quantity. No partial fulfilment.
    #[error("Out of stock: requested {requested}, remaining {remaining}")]
    OutOfStock {
        /// Requested quantity
        requested: u32,
        /// What is still available
        remaining: u32,
    },

    /// Quantity is zero, above the per-order limit, or prices out of range.
    #[error("Invalid quantity")]
    InvalidQuantity,

    /// Buyer identity is empty after normalization.
    #[error("Invalid buyer identity")]
    InvalidBuyerIdentity,

    /// No such ticket type in the stock ledger.
    #[error("Unknown ticket type: {0}")]
    UnknownTicketType(String),

    // ═══════════════════════════════════════════════════════════
    // Payment, gate, and services
    // ═══════════════════════════════════════════════════════════

    /// Ticket is missing, expired, or (for payment) no longer Reserved.
    #[error("Ticket not found")]
    TicketNotFound,

    /// Presented credential does not match. Deliberately uninformative.
    #[error("Ticket rejected")]
    InvalidCredential,

    /// Ticket has not been paid.
    #[error("Ticket is not paid")]
    NotPaid,

    /// Ticket already passed the gate.
    #[error("Ticket already checked in")]
    AlreadyCheckedIn,

    /// Service redemption attempted before gate check-in.
    #[error("Ticket must be checked in at the gate first")]
    NotCheckedIn,

    /// The service was already redeemed for this ticket.
    #[error("Service {kind} already redeemed")]
    AlreadyRedeemed {
        /// The service kind
        kind: ServiceKind,
    },

    /// Unknown service kind.
    #[error("Invalid service kind: {0}")]
    InvalidServiceKind(String),

    // ═══════════════════════════════════════════════════════════
    // Administration
    // ═══════════════════════════════════════════════════════════

    /// Admin token missing or wrong.
    #[error("Unauthorized")]
    Unauthorized,

    /// A ticket type with this id already exists.
    #[error("Ticket type already exists: {0}")]
    TicketTypeExists(String),

    /// Capacity cannot drop below what is already sold.
    #[error("Cannot reduce capacity below sold tickets ({sold})")]
    CapacityBelowSold {
        /// Paid quantity for the type
        sold: u32,
    },

    // ═══════════════════════════════════════════════════════════
    // Infrastructure
    // ═══════════════════════════════════════════════════════════

    /// Storage failure. The detail is for logs only and never displayed.
    #[error("Internal server error")]
    Storage(String),
}

impl TicketError {
    /// Whether this is an infrastructure failure rather than a domain outcome.
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Errors raised by [`crate::TicketStore`] implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored row could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for TicketError {
    fn from(error: StoreError) -> Self {
        Self::Storage(error.to_string())
    }
}
