//! Domain types for the ticket lifecycle.
//!
//! Value objects (identifiers, money, buyer identity), the stock ledger row
//! ([`TicketType`]), and the [`Ticket`] entity with its snapshot transitions.

use crate::error::TicketError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TicketId {
    type Err = TicketError;

    /// Unparseable ids are indistinguishable from unknown ones.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| TicketError::TicketNotFound)
    }
}

/// Identifier of a ticket type (`standard`, `vip`, ...).
///
/// Stored trimmed and lower-cased so `VIP` and `vip` name the same stock row.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketTypeId(String);

impl TicketTypeId {
    /// Creates a normalized `TicketTypeId`.
    #[must_use]
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    /// The normalized identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized buyer identity (an email address in practice).
///
/// Trimmed and case-folded before every uniqueness check, so
/// `" Alice@Example.com"` and `"alice@example.com"` are the same buyer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuyerIdentity(String);

impl BuyerIdentity {
    /// Normalize a raw buyer identity.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::InvalidBuyerIdentity`] if nothing is left after trimming.
    pub fn parse(raw: &str) -> Result<Self, TicketError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(TicketError::InvalidBuyerIdentity);
        }
        Ok(Self(normalized))
    }

    /// The normalized identity
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuyerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money Value Object
// ============================================================================

/// Money in integer minor units; never floating point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn new(amount: u64) -> Self {
        Self(amount)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn amount(&self) -> u64 {
        self.0
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Stock Ledger Row
// ============================================================================

/// A ticket type: the unit of stock accounting.
///
/// Only administrators create or change these. `total_capacity` is unsigned,
/// so it can never be negative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketType {
    /// Type identifier
    pub type_id: TicketTypeId,
    /// Current price per ticket
    pub unit_price: Money,
    /// Maximum quantity that may be Reserved + Paid at once
    pub total_capacity: u32,
}

impl TicketType {
    /// Creates a new `TicketType`
    #[must_use]
    pub fn new(type_id: impl AsRef<str>, unit_price: Money, total_capacity: u32) -> Self {
        Self {
            type_id: TicketTypeId::new(type_id),
            unit_price,
            total_capacity,
        }
    }
}

// ============================================================================
// Service Kinds
// ============================================================================

/// Venue services a checked-in ticket may redeem, each at most once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Food counter
    Food,
    /// Drink counter
    Drink,
    /// Merchandise store
    Store,
}

impl ServiceKind {
    /// Every service kind, in display order
    pub const ALL: [Self; 3] = [Self::Food, Self::Drink, Self::Store];

    /// Wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Food => "food",
            Self::Drink => "drink",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = TicketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "food" => Ok(Self::Food),
            "drink" => Ok(Self::Drink),
            "store" => Ok(Self::Store),
            other => Err(TicketError::InvalidServiceKind(other.to_string())),
        }
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// Persisted ticket state.
///
/// Expiry is not a stored state: an expired reservation is deleted and its
/// quantity stops counting against stock in the same step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketState {
    /// Holding stock, awaiting payment
    Reserved,
    /// Paid; credential issued
    Paid,
}

impl TicketState {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Paid => "paid",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reserved" => Some(Self::Reserved),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed credential attached at payment. Immutable once set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Hex-encoded keyed hash over ticket id and buyer identity
    pub token: String,
    /// When the credential was issued
    pub issued_at: DateTime<Utc>,
}

/// A ticket snapshot.
///
/// Transitions never mutate a snapshot; they return the next one with
/// `version + 1`, which the store writes with a compare-and-swap on the
/// previous version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier
    pub id: TicketId,
    /// Normalized buyer
    pub buyer: BuyerIdentity,
    /// Ticket type
    pub type_id: TicketTypeId,
    /// Number of admissions covered
    pub quantity: u32,
    /// Unit price captured at reservation time
    pub unit_price: Money,
    /// `unit_price * quantity`
    pub total_price: Money,
    /// Lifecycle state
    pub state: TicketState,
    /// When the reservation was created
    pub created_at: DateTime<Utc>,
    /// Set exactly once, at `Reserved -> Paid`
    pub credential: Option<Credential>,
    /// Gate check-in time
    pub checked_in_at: Option<DateTime<Utc>>,
    /// Redemption time per service kind
    pub service_redemptions: BTreeMap<ServiceKind, DateTime<Utc>>,
    /// Optimistic concurrency version
    pub version: u64,
}

impl Ticket {
    /// Build a new Reserved ticket priced from its ticket type.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::InvalidQuantity`] for a zero quantity or a total
    /// price that would overflow.
    pub fn reserve(
        id: TicketId,
        buyer: BuyerIdentity,
        ticket_type: &TicketType,
        quantity: u32,
        created_at: DateTime<Utc>,
    ) -> Result<Self, TicketError> {
        if quantity == 0 {
            return Err(TicketError::InvalidQuantity);
        }
        let total_price = ticket_type
            .unit_price
            .checked_multiply(quantity)
            .ok_or(TicketError::InvalidQuantity)?;

        Ok(Self {
            id,
            buyer,
            type_id: ticket_type.type_id.clone(),
            quantity,
            unit_price: ticket_type.unit_price,
            total_price,
            state: TicketState::Reserved,
            created_at,
            credential: None,
            checked_in_at: None,
            service_redemptions: BTreeMap::new(),
            version: 1,
        })
    }

    /// When an unpaid reservation becomes eligible for the sweeper.
    ///
    /// Saturates at the latest representable instant.
    #[must_use]
    pub fn expires_at(&self, window: Duration) -> DateTime<Utc> {
        self.created_at
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether this is a reservation created before `cutoff`.
    #[must_use]
    pub fn is_expired_reservation(&self, cutoff: DateTime<Utc>) -> bool {
        self.state == TicketState::Reserved && self.created_at < cutoff
    }

    /// Whether the ticket passed the gate.
    #[must_use]
    pub const fn is_checked_in(&self) -> bool {
        self.checked_in_at.is_some()
    }

    /// When `kind` was redeemed, if it was.
    #[must_use]
    pub fn redeemed_at(&self, kind: ServiceKind) -> Option<DateTime<Utc>> {
        self.service_redemptions.get(&kind).copied()
    }

    /// `Reserved -> Paid`, attaching the credential.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::TicketNotFound`] unless the ticket is Reserved;
    /// re-confirming a Paid ticket is not a no-op.
    pub fn confirm_payment(&self, credential: Credential) -> Result<Self, TicketError> {
        if self.state != TicketState::Reserved {
            return Err(TicketError::TicketNotFound);
        }
        Ok(Self {
            state: TicketState::Paid,
            credential: Some(credential),
            version: self.version + 1,
            ..self.clone()
        })
    }

    /// Gate check-in.
    ///
    /// # Errors
    ///
    /// - [`TicketError::NotPaid`] if the ticket is still Reserved
    /// - [`TicketError::AlreadyCheckedIn`] on a second scan
    pub fn check_in(&self, at: DateTime<Utc>) -> Result<Self, TicketError> {
        if self.state != TicketState::Paid {
            return Err(TicketError::NotPaid);
        }
        if self.checked_in_at.is_some() {
            return Err(TicketError::AlreadyCheckedIn);
        }
        Ok(Self {
            checked_in_at: Some(at),
            version: self.version + 1,
            ..self.clone()
        })
    }

    /// Redeem one service entitlement.
    ///
    /// # Errors
    ///
    /// - [`TicketError::NotPaid`] if the ticket is still Reserved
    /// - [`TicketError::NotCheckedIn`] before gate check-in
    /// - [`TicketError::AlreadyRedeemed`] if `kind` was already used
    pub fn redeem(&self, kind: ServiceKind, at: DateTime<Utc>) -> Result<Self, TicketError> {
        if self.state != TicketState::Paid {
            return Err(TicketError::NotPaid);
        }
        if self.checked_in_at.is_none() {
            return Err(TicketError::NotCheckedIn);
        }
        if self.service_redemptions.contains_key(&kind) {
            return Err(TicketError::AlreadyRedeemed { kind });
        }
        let mut service_redemptions = self.service_redemptions.clone();
        service_redemptions.insert(kind, at);
        Ok(Self {
            service_redemptions,
            version: self.version + 1,
            ..self.clone()
        })
    }
}

// ============================================================================
// Views
// ============================================================================

/// What a buyer sees after requesting a reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reserved ticket
    pub ticket_id: TicketId,
    /// Ticket type
    pub type_id: TicketTypeId,
    /// Reserved quantity
    pub quantity: u32,
    /// Amount due
    pub amount: Money,
    /// When the reservation lapses if unpaid
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Reservation view of a Reserved ticket.
    #[must_use]
    pub fn of(ticket: &Ticket, window: Duration) -> Self {
        Self {
            ticket_id: ticket.id,
            type_id: ticket.type_id.clone(),
            quantity: ticket.quantity,
            amount: ticket.total_price,
            expires_at: ticket.expires_at(window),
        }
    }
}

/// Result of a reservation request that did not fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// A new reservation now holds stock.
    Created(Reservation),
    /// The buyer already had a reservation; it is returned unchanged and no
    /// extra stock was taken.
    PendingExists(Reservation),
}

impl ReservationOutcome {
    /// The reservation regardless of whether it is new.
    #[must_use]
    pub const fn reservation(&self) -> &Reservation {
        match self {
            Self::Created(r) | Self::PendingExists(r) => r,
        }
    }
}

/// Status lookup result for a ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketStatus {
    /// Current state
    pub state: TicketState,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiry deadline (meaningful while Reserved)
    pub expires_at: DateTime<Utc>,
}

/// Per-type stock figures for operators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummary {
    /// Ticket type
    pub type_id: TicketTypeId,
    /// Current unit price
    pub unit_price: Money,
    /// Configured capacity
    pub total_capacity: u32,
    /// Paid quantity
    pub sold: u32,
    /// Reserved (unpaid) quantity
    pub reserved: u32,
    /// `total - sold - reserved`, clamped at zero
    pub remaining: u32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_ticket() -> Ticket {
        let ticket_type = TicketType::new("standard", Money::new(500_000), 10);
        Ticket::reserve(
            TicketId::new(),
            BuyerIdentity::parse("a@example.com").unwrap(),
            &ticket_type,
            2,
            Utc::now(),
        )
        .unwrap()
    }

    fn credential() -> Credential {
        Credential {
            token: "abc".to_string(),
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn test_buyer_identity_is_normalized() {
        let a = BuyerIdentity::parse("  Alice@Example.COM ").unwrap();
        let b = BuyerIdentity::parse("alice@example.com").unwrap();
        assert_eq!(a, b);
        assert_eq!(BuyerIdentity::parse("   "), Err(TicketError::InvalidBuyerIdentity));
    }

    #[test]
    fn test_reserve_prices_from_ticket_type() {
        let ticket = sample_ticket();
        assert_eq!(ticket.state, TicketState::Reserved);
        assert_eq!(ticket.unit_price, Money::new(500_000));
        assert_eq!(ticket.total_price, Money::new(1_000_000));
        assert_eq!(ticket.version, 1);
    }

    #[test]
    fn test_reserve_rejects_zero_and_overflowing_quantity() {
        let buyer = BuyerIdentity::parse("a@example.com").unwrap();
        let cheap = TicketType::new("standard", Money::new(1), 10);
        let pricey = TicketType::new("vip", Money::new(u64::MAX), 10);

        let zero = Ticket::reserve(TicketId::new(), buyer.clone(), &cheap, 0, Utc::now());
        let overflow = Ticket::reserve(TicketId::new(), buyer, &pricey, 2, Utc::now());

        assert_eq!(zero, Err(TicketError::InvalidQuantity));
        assert_eq!(overflow, Err(TicketError::InvalidQuantity));
    }

    #[test]
    fn test_confirm_payment_only_from_reserved() {
        let paid = sample_ticket().confirm_payment(credential()).unwrap();
        assert_eq!(paid.state, TicketState::Paid);
        assert_eq!(paid.version, 2);
        assert_eq!(paid.confirm_payment(credential()), Err(TicketError::TicketNotFound));
    }

    #[test]
    fn test_check_in_guards() {
        let reserved = sample_ticket();
        assert_eq!(reserved.check_in(Utc::now()), Err(TicketError::NotPaid));

        let checked_in = reserved
            .confirm_payment(credential())
            .unwrap()
            .check_in(Utc::now())
            .unwrap();
        assert!(checked_in.is_checked_in());
        assert_eq!(checked_in.check_in(Utc::now()), Err(TicketError::AlreadyCheckedIn));
    }

    #[test]
    fn test_redemption_is_once_per_kind() {
        let paid = sample_ticket().confirm_payment(credential()).unwrap();
        assert_eq!(paid.redeem(ServiceKind::Food, Utc::now()), Err(TicketError::NotCheckedIn));

        let ticket = paid.check_in(Utc::now()).unwrap();
        let after_food = ticket.redeem(ServiceKind::Food, Utc::now()).unwrap();
        assert!(after_food.redeemed_at(ServiceKind::Food).is_some());
        assert_eq!(
            after_food.redeem(ServiceKind::Food, Utc::now()),
            Err(TicketError::AlreadyRedeemed { kind: ServiceKind::Food })
        );

        let after_drink = after_food.redeem(ServiceKind::Drink, Utc::now()).unwrap();
        assert_eq!(after_drink.service_redemptions.len(), 2);
    }

    #[test]
    fn test_service_kind_parsing() {
        assert_eq!(" Food ".parse::<ServiceKind>(), Ok(ServiceKind::Food));
        assert_eq!(
            "spa".parse::<ServiceKind>(),
            Err(TicketError::InvalidServiceKind("spa".to_string()))
        );
    }

    #[test]
    fn test_expiry_window() {
        let ticket = sample_ticket();
        let window = Duration::minutes(15);
        assert_eq!(ticket.expires_at(window), ticket.created_at + window);

        // cutoff = now - window; a reservation is expired once it is strictly older
        assert!(!ticket.is_expired_reservation(ticket.created_at));
        assert!(ticket.is_expired_reservation(ticket.created_at + Duration::seconds(1)));

        let paid = ticket.confirm_payment(credential()).unwrap();
        assert!(!paid.is_expired_reservation(paid.created_at + Duration::hours(1)));
    }

    #[test]
    fn test_expiry_saturates_instead_of_overflowing() {
        let ticket = sample_ticket();
        assert_eq!(ticket.expires_at(Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
