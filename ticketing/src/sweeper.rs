//! Expiry sweeper.
//!
//! Periodically deletes Reserved tickets older than `now - expiry_window`,
//! returning their quantity to the stock ledger and logging one activity
//! event per deletion.
//!
//! # Race with payment
//!
//! Selection and deletion are separate steps, so a ticket selected as expired
//! may be confirmed before the sweeper reaches it. The delete is therefore
//! conditional ([`TicketStore::delete_expired_reservation`]): it re-checks
//! `state == Reserved AND created_at < cutoff` in the same atomic step. A
//! ticket that was paid in between is skipped; a confirmation that loses to
//! the delete sees `TicketNotFound`.
//!
//! # Failure isolation
//!
//! A failure on one ticket is logged and counted; the run continues with the
//! next ticket and the next run retries it.

use crate::ledger::StockLedger;
use crate::metrics;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use ticketgate_core::environment::Clock;
use ticketgate_core::{
    ActivityAction, ActivityEvent, ActivityRecorder, Actor, Ticket, TicketError, TicketId,
    TicketStore,
};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Result of one sweep run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tickets deleted by this run
    pub expired: Vec<TicketId>,
    /// Tickets skipped because they changed state before deletion
    pub skipped: usize,
    /// Tickets whose deletion failed
    pub failed: usize,
}

/// Background task reclaiming stock from unpaid reservations.
pub struct ExpirySweeper {
    store: Arc<dyn TicketStore>,
    ledger: StockLedger,
    clock: Arc<dyn Clock>,
    recorder: Arc<dyn ActivityRecorder>,
    expiry_window: Duration,
    interval: std::time::Duration,
}

impl ExpirySweeper {
    /// Create a sweeper.
    ///
    /// # Arguments
    ///
    /// * `store` - Ticket storage shared with the lifecycle manager
    /// * `clock` - Time source
    /// * `recorder` - Activity trail sink
    /// * `expiry_window` - Age after which an unpaid reservation is deleted
    /// * `interval` - Time between runs
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        clock: Arc<dyn Clock>,
        recorder: Arc<dyn ActivityRecorder>,
        expiry_window: Duration,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            ledger: StockLedger::new(Arc::clone(&store)),
            store,
            clock,
            recorder,
            expiry_window,
            interval,
        }
    }

    /// Run one sweep.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Storage`] only if the expired set cannot be
    /// selected at all. Per-ticket failures are counted in the report.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport, TicketError> {
        // A window reaching past the calendar start expires nothing.
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(self.expiry_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let candidates = self.store.expired_reservations(cutoff).await?;
        let mut report = SweepReport::default();

        for candidate in candidates {
            match self.store.delete_expired_reservation(candidate.id, cutoff).await {
                Ok(Some(deleted)) => {
                    self.reclaim(&deleted).await;
                    report.expired.push(deleted.id);
                }
                Ok(None) => {
                    debug!(ticket_id = %candidate.id, "Reservation changed before expiry, skipped");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(ticket_id = %candidate.id, error = %e, "Failed to expire reservation");
                    report.failed += 1;
                }
            }
        }

        metrics::record_sweep(report.expired.len(), report.failed);
        if report.expired.is_empty() && report.failed == 0 {
            debug!("Sweep found nothing to expire");
        } else {
            info!(
                expired = report.expired.len(),
                skipped = report.skipped,
                failed = report.failed,
                "Sweep finished"
            );
        }
        Ok(report)
    }

    async fn reclaim(&self, ticket: &Ticket) {
        info!(
            ticket_id = %ticket.id,
            buyer = %ticket.buyer,
            type_id = %ticket.type_id,
            quantity = ticket.quantity,
            "Reservation expired"
        );
        // The row is gone, so the stock is back whether or not the gauge refreshes.
        if let Err(e) = self.ledger.release(ticket).await {
            warn!(ticket_id = %ticket.id, error = %e, "Failed to refresh stock after expiry");
        }
        let event = ActivityEvent::new(
            self.clock.now(),
            ActivityAction::ReservationExpired,
            ticket.buyer.as_str(),
            Actor::System,
            Some(ticket.id),
        );
        if let Err(e) = self.recorder.record(event).await {
            warn!(ticket_id = %ticket.id, error = %e, "Failed to record activity");
        }
    }

    /// Spawn the sweep loop as a background task.
    ///
    /// The first run happens immediately. The task exits when `shutdown`
    /// fires (or its sender is dropped).
    #[must_use]
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                interval_secs = self.interval.as_secs(),
                window_minutes = self.expiry_window.num_minutes(),
                "Expiry sweeper started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Expiry sweeper received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            error!(error = %e, "Sweep run failed");
                        }
                    }
                }
            }

            info!("Expiry sweeper stopped");
        })
    }
}
