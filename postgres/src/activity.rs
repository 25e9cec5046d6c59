//! `PostgreSQL` activity trail.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use ticketgate_core::{
    ActivityAction, ActivityError, ActivityEvent, ActivityFuture, ActivityRecorder, Actor,
    TicketId,
};
use uuid::Uuid;

/// Activity recorder writing to the `activity_log` table.
///
/// With a retention limit set, each insert also prunes everything but the
/// newest `retention` rows.
#[derive(Clone)]
pub struct PostgresActivityRecorder {
    pool: PgPool,
    retention: Option<i64>,
}

impl PostgresActivityRecorder {
    /// Create a recorder that keeps every row.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool, retention: None }
    }

    /// Keep only the newest `retention` rows.
    #[must_use]
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = Some(i64::try_from(retention).unwrap_or(i64::MAX));
        self
    }

    async fn select_recent(&self, limit: usize) -> Result<Vec<ActivityEvent>, ActivityError> {
        let rows = sqlx::query(
            "SELECT at, action, subject, actor, ticket_id
             FROM activity_log
             ORDER BY at DESC, id DESC
             LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ActivityError::Sink(format!("Failed to read activity log: {e}")))?;

        rows.iter().map(event_from_row).collect()
    }

    async fn insert(&self, event: ActivityEvent) -> Result<(), ActivityError> {
        sqlx::query(
            "INSERT INTO activity_log (at, action, description, subject, actor, ticket_id)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.at)
        .bind(Json(&event.action))
        .bind(event.action.to_string())
        .bind(&event.subject)
        .bind(event.actor.as_str())
        .bind(event.ticket_id.map(|id| *id.as_uuid()))
        .execute(&self.pool)
        .await
        .map_err(|e| ActivityError::Sink(format!("Failed to append activity: {e}")))?;

        if let Some(retention) = self.retention {
            sqlx::query(
                "DELETE FROM activity_log
                 WHERE id NOT IN (SELECT id FROM activity_log ORDER BY at DESC, id DESC LIMIT $1)",
            )
            .bind(retention)
            .execute(&self.pool)
            .await
            .map_err(|e| ActivityError::Sink(format!("Failed to prune activity log: {e}")))?;
        }

        Ok(())
    }
}

impl ActivityRecorder for PostgresActivityRecorder {
    fn record(&self, event: ActivityEvent) -> ActivityFuture<'_, ()> {
        Box::pin(self.insert(event))
    }

    fn recent(&self, limit: usize) -> ActivityFuture<'_, Vec<ActivityEvent>> {
        Box::pin(self.select_recent(limit))
    }
}

fn event_from_row(row: &PgRow) -> Result<ActivityEvent, ActivityError> {
    let decode = |e: sqlx::Error| ActivityError::Serialization(e.to_string());

    let at: DateTime<Utc> = row.try_get("at").map_err(decode)?;
    let Json(action): Json<ActivityAction> = row.try_get("action").map_err(decode)?;
    let subject: String = row.try_get("subject").map_err(decode)?;
    let actor: String = row.try_get("actor").map_err(decode)?;
    let actor = Actor::parse(&actor)
        .ok_or_else(|| ActivityError::Serialization(format!("Unknown actor: {actor}")))?;
    let ticket_id: Option<Uuid> = row.try_get("ticket_id").map_err(decode)?;

    Ok(ActivityEvent::new(at, action, subject, actor, ticket_id.map(TicketId::from_uuid)))
}
