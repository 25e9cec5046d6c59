//! Append-only activity trail for operators.
//!
//! The lifecycle emits one [`ActivityEvent`] per committed transition and
//! operators read the trail back newest first. Retention and rotation belong
//! to the implementation.

use crate::types::{Money, ServiceKind, TicketId, TicketTypeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`ActivityRecorder`] methods.
pub type ActivityFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ActivityError>> + Send + 'a>>;

/// Subject recorded for administrative events that have no buyer.
pub const ADMIN_SUBJECT: &str = "admin@system";

/// Who caused a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actor {
    /// Buyer requests and background jobs
    System,
    /// Venue staff at the gate or a service counter
    Staff,
    /// An administrator
    Admin,
}

impl Actor {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "System",
            Self::Staff => "Staff",
            Self::Admin => "Admin",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "System" => Some(Self::System),
            "Staff" => Some(Self::Staff),
            "Admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityAction {
    /// A reservation was created
    ReservationCreated,
    /// Payment confirmed and credential issued
    PaymentConfirmed,
    /// Ticket passed the gate
    CheckedIn,
    /// A service entitlement was consumed
    ServiceRedeemed {
        /// Redeemed service
        service: ServiceKind,
    },
    /// The sweeper removed an unpaid reservation
    ReservationExpired,
    /// An administrator deleted a ticket
    TicketDeleted,
    /// An administrator added a ticket type
    TicketTypeAdded {
        /// New type
        type_id: TicketTypeId,
    },
    /// An administrator changed capacity or price
    StockUpdated {
        /// Updated type
        type_id: TicketTypeId,
        /// New capacity
        total_capacity: u32,
        /// New price, if changed
        unit_price: Option<Money>,
    },
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReservationCreated => f.write_str("Reservation created"),
            Self::PaymentConfirmed => f.write_str("Payment confirmed"),
            Self::CheckedIn => f.write_str("Gate check-in"),
            Self::ServiceRedeemed { service } => write!(f, "Redeemed {service}"),
            Self::ReservationExpired => f.write_str("Auto-deleted expired ticket"),
            Self::TicketDeleted => f.write_str("Ticket deleted"),
            Self::TicketTypeAdded { type_id } => write!(f, "Added new stock type {type_id}"),
            Self::StockUpdated { type_id, total_capacity, unit_price } => {
                write!(f, "Updated stock for {type_id}: total={total_capacity}")?;
                if let Some(price) = unit_price {
                    write!(f, ", price={price}")?;
                }
                Ok(())
            }
        }
    }
}

/// One entry of the activity trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// When it happened
    pub at: DateTime<Utc>,
    /// What happened
    pub action: ActivityAction,
    /// Buyer identity, or [`ADMIN_SUBJECT`]
    pub subject: String,
    /// Who did it
    pub actor: Actor,
    /// Ticket involved, if any
    pub ticket_id: Option<TicketId>,
}

impl ActivityEvent {
    /// Creates a new `ActivityEvent`
    #[must_use]
    pub fn new(
        at: DateTime<Utc>,
        action: ActivityAction,
        subject: impl Into<String>,
        actor: Actor,
        ticket_id: Option<TicketId>,
    ) -> Self {
        Self {
            at,
            action,
            subject: subject.into(),
            actor,
            ticket_id,
        }
    }
}

/// Errors from activity recorders.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActivityError {
    /// The sink could not be written.
    #[error("Activity sink error: {0}")]
    Sink(String),

    /// The event could not be encoded.
    #[error("Activity serialization error: {0}")]
    Serialization(String),
}

/// Append-only trail of [`ActivityEvent`]s.
pub trait ActivityRecorder: Send + Sync {
    /// Append one event.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityError`] if the sink rejects the write. Callers log
    /// the failure; it never undoes the transition.
    fn record(&self, event: ActivityEvent) -> ActivityFuture<'_, ()>;

    /// Up to `limit` events, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityError`] if the trail cannot be read.
    fn recent(&self, limit: usize) -> ActivityFuture<'_, Vec<ActivityEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_display() {
        let action = ActivityAction::StockUpdated {
            type_id: TicketTypeId::new("vip"),
            total_capacity: 60,
            unit_price: Some(Money::new(1_200_000)),
        };
        assert_eq!(action.to_string(), "Updated stock for vip: total=60, price=1200000");
        assert_eq!(
            ActivityAction::ServiceRedeemed { service: ServiceKind::Drink }.to_string(),
            "Redeemed drink"
        );
    }
}
