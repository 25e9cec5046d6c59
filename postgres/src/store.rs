//! `PostgreSQL` ticket store.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Executor, PgPool, Postgres, Row};
use std::collections::BTreeMap;
use std::time::Instant;
use ticketgate_core::{
    BuyerIdentity, CapacityUpdate, CommitScope, Credential, Money, ReservationInsert, ServiceKind,
    StoreError, StoreFuture, Ticket, TicketId, TicketState, TicketStore, TicketType, TicketTypeId,
};

const TICKET_COLUMNS: &str = "id, buyer_identity, type_id, quantity, unit_price, total_price, \
     state, created_at, credential_token, credential_issued_at, checked_in_at, \
     service_redemptions, version";

/// `PostgreSQL`-backed [`TicketStore`].
///
/// Committed quantities are computed with `SUM(quantity)` on every call.
/// Admission takes `SELECT ... FOR UPDATE` on the ticket type row, so two
/// reservations for the same type never evaluate capacity concurrently. The
/// `UNIQUE (buyer_identity)` constraint covers the cross-type case.
#[derive(Clone)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[tracing::instrument(
        skip(self, ticket),
        fields(ticket_id = %ticket.id, type_id = %ticket.type_id)
    )]
    async fn admit(&self, ticket: &Ticket) -> Result<ReservationInsert, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to start transaction: {e}")))?;

        // Serializes admissions per ticket type until commit.
        let capacity: Option<(i32,)> =
            sqlx::query_as("SELECT total_capacity FROM ticket_types WHERE type_id = $1 FOR UPDATE")
                .bind(ticket.type_id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(format!("Failed to lock ticket type: {e}")))?;

        if let Some(existing) = buyer_ticket(&mut *tx, &ticket.buyer).await? {
            let _ = tx.rollback().await;
            return Ok(existing_outcome(existing));
        }

        let Some((capacity,)) = capacity else {
            let _ = tx.rollback().await;
            return Ok(ReservationInsert::UnknownType);
        };

        let committed =
            committed_on(&mut *tx, &ticket.type_id, CommitScope::ReservedAndPaid).await?;
        let remaining = from_i32(capacity, "total_capacity")?.saturating_sub(committed);
        if ticket.quantity > remaining {
            let _ = tx.rollback().await;
            return Ok(ReservationInsert::OutOfStock { remaining });
        }

        let inserted = sqlx::query(
            "INSERT INTO tickets (id, buyer_identity, type_id, quantity, unit_price,
                                  total_price, state, created_at, service_redemptions, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(ticket.id.as_uuid())
        .bind(ticket.buyer.as_str())
        .bind(ticket.type_id.as_str())
        .bind(to_i32(ticket.quantity, "quantity")?)
        .bind(to_i64(ticket.unit_price.amount(), "unit_price")?)
        .bind(to_i64(ticket.total_price.amount(), "total_price")?)
        .bind(ticket.state.as_str())
        .bind(ticket.created_at)
        .bind(Json(&ticket.service_redemptions))
        .bind(to_i64(ticket.version, "version")?)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                let _ = tx.rollback().await;
                // The same buyer was admitted on another ticket type meanwhile.
                metrics::counter!("ticketgate_store_buyer_conflicts_total").increment(1);
                return match buyer_ticket(&self.pool, &ticket.buyer).await? {
                    Some(existing) => Ok(existing_outcome(existing)),
                    None => Err(StoreError::Database(
                        "Buyer conflict without a stored ticket".to_string(),
                    )),
                };
            }
            Err(e) => {
                return Err(StoreError::Database(format!("Failed to insert reservation: {e}")));
            }
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to commit reservation: {e}")))?;

        Ok(ReservationInsert::Inserted(ticket.clone()))
    }

    async fn update_capacity(
        &self,
        type_id: &TicketTypeId,
        total_capacity: u32,
        unit_price: Option<Money>,
    ) -> Result<CapacityUpdate, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to start transaction: {e}")))?;

        let exists: Option<(String,)> =
            sqlx::query_as("SELECT type_id FROM ticket_types WHERE type_id = $1 FOR UPDATE")
                .bind(type_id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(format!("Failed to lock ticket type: {e}")))?;
        if exists.is_none() {
            let _ = tx.rollback().await;
            return Ok(CapacityUpdate::NotFound);
        }

        let sold = committed_on(&mut *tx, type_id, CommitScope::PaidOnly).await?;
        if total_capacity < sold {
            let _ = tx.rollback().await;
            return Ok(CapacityUpdate::BelowSold { sold });
        }

        let unit_price = unit_price
            .map(|price| to_i64(price.amount(), "unit_price"))
            .transpose()?;
        let row = sqlx::query(
            "UPDATE ticket_types
             SET total_capacity = $2, unit_price = COALESCE($3, unit_price)
             WHERE type_id = $1
             RETURNING type_id, unit_price, total_capacity",
        )
        .bind(type_id.as_str())
        .bind(to_i32(total_capacity, "total_capacity")?)
        .bind(unit_price)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to update ticket type: {e}")))?;
        let updated = ticket_type_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to commit capacity update: {e}")))?;

        Ok(CapacityUpdate::Updated(updated))
    }

    async fn fetch_tickets(
        &self,
        sql: &str,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<Ticket>, StoreError> {
        let mut query = sqlx::query(sql);
        if let Some(cutoff) = cutoff {
            query = query.bind(cutoff);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to list tickets: {e}")))?;
        rows.iter().map(ticket_from_row).collect()
    }
}

impl TicketStore for PostgresTicketStore {
    fn ticket_type(&self, type_id: TicketTypeId) -> StoreFuture<'_, Option<TicketType>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT type_id, unit_price, total_capacity FROM ticket_types WHERE type_id = $1",
            )
            .bind(type_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to load ticket type: {e}")))?;
            row.as_ref().map(ticket_type_from_row).transpose()
        })
    }

    fn ticket_types(&self) -> StoreFuture<'_, Vec<TicketType>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT type_id, unit_price, total_capacity FROM ticket_types ORDER BY type_id",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to list ticket types: {e}")))?;
            rows.iter().map(ticket_type_from_row).collect()
        })
    }

    fn insert_ticket_type(&self, ticket_type: TicketType) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "INSERT INTO ticket_types (type_id, unit_price, total_capacity)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (type_id) DO NOTHING",
            )
            .bind(ticket_type.type_id.as_str())
            .bind(to_i64(ticket_type.unit_price.amount(), "unit_price")?)
            .bind(to_i32(ticket_type.total_capacity, "total_capacity")?)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to insert ticket type: {e}")))?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn update_ticket_type(
        &self,
        type_id: TicketTypeId,
        total_capacity: u32,
        unit_price: Option<Money>,
    ) -> StoreFuture<'_, CapacityUpdate> {
        Box::pin(async move { self.update_capacity(&type_id, total_capacity, unit_price).await })
    }

    fn committed_quantity(
        &self,
        type_id: TicketTypeId,
        scope: CommitScope,
    ) -> StoreFuture<'_, u32> {
        Box::pin(async move { committed_on(&self.pool, &type_id, scope).await })
    }

    fn insert_reservation(&self, ticket: Ticket) -> StoreFuture<'_, ReservationInsert> {
        Box::pin(async move {
            let started = Instant::now();
            let outcome = self.admit(&ticket).await;
            metrics::histogram!("ticketgate_store_reservation_seconds")
                .record(started.elapsed().as_secs_f64());
            outcome
        })
    }

    fn ticket(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Database(format!("Failed to load ticket: {e}")))?;
            row.as_ref().map(ticket_from_row).transpose()
        })
    }

    fn find_by_buyer(
        &self,
        buyer: BuyerIdentity,
        state: TicketState,
    ) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE buyer_identity = $1 AND state = $2"
            ))
            .bind(buyer.as_str())
            .bind(state.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to find buyer ticket: {e}")))?;
            row.as_ref().map(ticket_from_row).transpose()
        })
    }

    fn list_tickets(&self) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            self.fetch_tickets(
                &format!("SELECT {TICKET_COLUMNS} FROM tickets ORDER BY created_at DESC"),
                None,
            )
            .await
        })
    }

    fn replace_ticket(&self, next: Ticket, expected_version: u64) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE tickets
                 SET state = $2,
                     credential_token = $3,
                     credential_issued_at = $4,
                     checked_in_at = $5,
                     service_redemptions = $6,
                     version = $7
                 WHERE id = $1 AND version = $8",
            )
            .bind(next.id.as_uuid())
            .bind(next.state.as_str())
            .bind(next.credential.as_ref().map(|c| c.token.clone()))
            .bind(next.credential.as_ref().map(|c| c.issued_at))
            .bind(next.checked_in_at)
            .bind(Json(&next.service_redemptions))
            .bind(to_i64(next.version, "version")?)
            .bind(to_i64(expected_version, "version")?)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to update ticket: {e}")))?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn expired_reservations(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            self.fetch_tickets(
                &format!(
                    "SELECT {TICKET_COLUMNS} FROM tickets
                     WHERE state = 'reserved' AND created_at < $1
                     ORDER BY created_at"
                ),
                Some(cutoff),
            )
            .await
        })
    }

    fn delete_expired_reservation(
        &self,
        id: TicketId,
        cutoff: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "DELETE FROM tickets
                 WHERE id = $1 AND state = 'reserved' AND created_at < $2
                 RETURNING {TICKET_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .bind(cutoff)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                StoreError::Database(format!("Failed to delete expired reservation: {e}"))
            })?;
            row.as_ref().map(ticket_from_row).transpose()
        })
    }

    fn delete_ticket(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "DELETE FROM tickets WHERE id = $1 RETURNING {TICKET_COLUMNS}"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to delete ticket: {e}")))?;
            row.as_ref().map(ticket_from_row).transpose()
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Shared queries
// ═══════════════════════════════════════════════════════════════════════

async fn committed_on<'c, E>(
    executor: E,
    type_id: &TicketTypeId,
    scope: CommitScope,
) -> Result<u32, StoreError>
where
    E: Executor<'c, Database = Postgres>,
{
    let states: Vec<&str> = scope.states().iter().map(TicketState::as_str).collect();
    let (total,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(quantity), 0)::BIGINT
         FROM tickets
         WHERE type_id = $1 AND state = ANY($2)",
    )
    .bind(type_id.as_str())
    .bind(states)
    .fetch_one(executor)
    .await
    .map_err(|e| StoreError::Database(format!("Failed to sum committed quantity: {e}")))?;

    u32::try_from(total).map_err(|_| {
        StoreError::Serialization(format!("Committed quantity out of range: {total}"))
    })
}

async fn buyer_ticket<'c, E>(
    executor: E,
    buyer: &BuyerIdentity,
) -> Result<Option<Ticket>, StoreError>
where
    E: Executor<'c, Database = Postgres>,
{
    let row =
        sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE buyer_identity = $1"))
            .bind(buyer.as_str())
            .fetch_optional(executor)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to check buyer: {e}")))?;
    row.as_ref().map(ticket_from_row).transpose()
}

fn existing_outcome(existing: Ticket) -> ReservationInsert {
    match existing.state {
        TicketState::Paid => ReservationInsert::BuyerHasPaid(existing),
        TicketState::Reserved => ReservationInsert::BuyerHasPending(existing),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════════════════════════════════

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Serialization(format!("Failed to decode {name}: {e}")))
}

fn ticket_type_from_row(row: &PgRow) -> Result<TicketType, StoreError> {
    let type_id: String = column(row, "type_id")?;
    Ok(TicketType {
        type_id: TicketTypeId::new(type_id),
        unit_price: Money::new(from_i64(column(row, "unit_price")?, "unit_price")?),
        total_capacity: from_i32(column(row, "total_capacity")?, "total_capacity")?,
    })
}

fn ticket_from_row(row: &PgRow) -> Result<Ticket, StoreError> {
    let buyer: String = column(row, "buyer_identity")?;
    let buyer = BuyerIdentity::parse(&buyer)
        .map_err(|_| StoreError::Serialization(format!("Invalid buyer identity: {buyer:?}")))?;

    let state: String = column(row, "state")?;
    let state = TicketState::parse(&state)
        .ok_or_else(|| StoreError::Serialization(format!("Invalid ticket state: {state}")))?;

    let token: Option<String> = column(row, "credential_token")?;
    let issued_at: Option<DateTime<Utc>> = column(row, "credential_issued_at")?;
    let credential = token
        .zip(issued_at)
        .map(|(token, issued_at)| Credential { token, issued_at });

    let type_id: String = column(row, "type_id")?;
    let Json(service_redemptions): Json<BTreeMap<ServiceKind, DateTime<Utc>>> =
        column(row, "service_redemptions")?;

    Ok(Ticket {
        id: TicketId::from_uuid(column(row, "id")?),
        buyer,
        type_id: TicketTypeId::new(type_id),
        quantity: from_i32(column(row, "quantity")?, "quantity")?,
        unit_price: Money::new(from_i64(column(row, "unit_price")?, "unit_price")?),
        total_price: Money::new(from_i64(column(row, "total_price")?, "total_price")?),
        state,
        created_at: column(row, "created_at")?,
        credential,
        checked_in_at: column(row, "checked_in_at")?,
        service_redemptions,
        version: from_i64(column(row, "version")?, "version")?,
    })
}

fn to_i64(value: u64, field: &str) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("{field} out of range: {value}")))
}

fn to_i32(value: u32, field: &str) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("{field} out of range: {value}")))
}

fn from_i64(value: i64, field: &str) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("{field} is negative: {value}")))
}

fn from_i32(value: i32, field: &str) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("{field} is negative: {value}")))
}
