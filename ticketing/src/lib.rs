//! Ticketgate ticketing service.
//!
//! Sells event tickets against finite stock, issues a signed credential on
//! payment, and gates venue entry and per-service redemption.
//!
//! # Architecture
//!
//! ```text
//!  buyer ──reserve──▶ ┌────────────────────┐ ◀──check_in/redeem── scanner
//!  payment ─confirm─▶ │  TicketLifecycle   │
//!                     └─────────┬──────────┘
//!                               │ admission, CAS transitions
//!                               ▼
//!  ┌──────────────┐     ┌───────────────┐     ┌──────────────────┐
//!  │ StockLedger  │────▶│  TicketStore  │◀────│  ExpirySweeper   │
//!  └──────────────┘     └───────────────┘     └──────────────────┘
//!         ▲                                            │
//!         └──────────────── AdminService               ▼
//!                                              ActivityRecorder
//! ```
//!
//! # Key Features
//!
//! ## 1. No oversell
//!
//! Remaining stock is always derived from live ticket rows:
//!
//! ```text
//! remaining = total_capacity - sum(quantity where state in {Reserved, Paid})
//! ```
//!
//! Admission checks and inserts in one atomic step scoped to the ticket type,
//! so concurrent buyers can never push committed stock past capacity.
//!
//! ## 2. One ticket per buyer
//!
//! Buyer identities are trimmed and case-folded. A buyer with a Paid ticket is
//! refused; a buyer with a pending reservation gets that same reservation back.
//!
//! ## 3. Expiry
//!
//! Unpaid reservations older than the expiry window are deleted by the
//! sweeper, which returns their stock. A payment racing the sweeper either
//! wins (the sweeper skips the ticket) or sees `TicketNotFound`.
//!
//! ## 4. Venue
//!
//! Check-in requires a credential that verifies against the ticket id and
//! buyer. Each service (food, drink, store) can be redeemed once, after
//! check-in.

pub mod activity_log;
pub mod admin;
pub mod config;
pub mod delivery;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod runtime;
pub mod seed;
pub mod sweeper;

pub use activity_log::JsonFileActivityRecorder;
pub use admin::AdminService;
pub use config::{Config, ConfigError};
pub use delivery::LoggingDelivery;
pub use ledger::StockLedger;
pub use lifecycle::{LifecycleDeps, LifecycleSettings, RedemptionAuth, TicketLifecycle};
pub use runtime::{Application, Services};
pub use sweeper::{ExpirySweeper, SweepReport};
