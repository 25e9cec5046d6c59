//! `PostgreSQL` storage for Ticketgate.
//!
//! This crate provides the production implementations of the collaborator
//! contracts from `ticketgate-core`:
//!
//! - [`PostgresTicketStore`]: the [`TicketStore`](ticketgate_core::TicketStore)
//!   for ticket types and tickets. Reservation admission runs in a transaction
//!   holding a row lock on the ticket type; every other transition is a single
//!   conditional statement.
//! - [`PostgresActivityRecorder`]: the operator activity trail in the
//!   `activity_log` table.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use ticketgate_postgres::{PostgresTicketStore, connect_pool, migrate};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let url = "postgres://localhost/ticketgate";
//!     let pool = connect_pool(url, 10, 2, Duration::from_secs(30)).await?;
//!     migrate(&pool).await?;
//!     let store = PostgresTicketStore::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod activity;
mod store;

pub use activity::PostgresActivityRecorder;
pub use store::PostgresTicketStore;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use ticketgate_core::StoreError;

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if the database cannot be reached within
/// `connect_timeout`.
pub async fn connect_pool(
    url: &str,
    max_connections: u32,
    min_connections: u32,
    connect_timeout: Duration,
) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .acquire_timeout(connect_timeout)
        .connect(url)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))
}

/// Apply the bundled schema migrations.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))
}
