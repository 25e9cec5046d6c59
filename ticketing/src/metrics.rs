//! Business metrics for the ticketing service.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `ticketgate_reservations_total{status}` - Reservation requests by outcome
//!   (created, pending, out_of_stock, rejected, expired, deleted)
//! - `ticketgate_payments_confirmed_total` - Confirmed payments
//! - `ticketgate_tickets_sold_total` - Admissions sold (sum of quantities)
//! - `ticketgate_checkins_total` - Gate check-ins
//! - `ticketgate_redemptions_total{service}` - Service redemptions by kind
//! - `ticketgate_credential_rejections_total` - Credentials that failed verification
//! - `ticketgate_sweeps_total` - Completed expiry sweeps
//! - `ticketgate_sweep_failures_total` - Per-ticket sweep failures
//!
//! ## Gauges
//! - `ticketgate_stock_remaining{type_id}` - Remaining stock per ticket type

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use thiserror::Error;
use ticketgate_core::{ServiceKind, TicketTypeId};

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install the Prometheus exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if a recorder is already installed or the
/// listener cannot bind.
pub fn install_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    register_business_metrics();
    tracing::info!(%addr, "Prometheus metrics available at http://{addr}/metrics");
    Ok(())
}

/// Register all business metric descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "ticketgate_reservations_total",
        "Reservation outcomes: created, pending, out_of_stock, rejected, expired, deleted"
    );
    describe_counter!("ticketgate_payments_confirmed_total", "Total confirmed payments");
    describe_counter!("ticketgate_tickets_sold_total", "Total admissions sold");
    describe_counter!("ticketgate_checkins_total", "Total gate check-ins");
    describe_counter!("ticketgate_redemptions_total", "Service redemptions by kind");
    describe_counter!(
        "ticketgate_credential_rejections_total",
        "Presented credentials that failed verification"
    );
    describe_counter!("ticketgate_sweeps_total", "Completed expiry sweeps");
    describe_counter!(
        "ticketgate_sweep_failures_total",
        "Reservations the sweeper failed to delete"
    );
    describe_gauge!("ticketgate_stock_remaining", "Remaining stock per ticket type");

    tracing::info!("Business metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record the outcome of a reservation request.
///
/// # Arguments
///
/// * `status` - created, pending, `out_of_stock`, rejected, expired or deleted
pub fn record_reservation(status: &'static str) {
    metrics::counter!("ticketgate_reservations_total", "status" => status).increment(1);
}

/// Record a confirmed payment.
pub fn record_payment_confirmed(quantity: u32) {
    metrics::counter!("ticketgate_payments_confirmed_total").increment(1);
    metrics::counter!("ticketgate_tickets_sold_total").increment(u64::from(quantity));
    tracing::debug!(quantity, "Recorded payment_confirmed metric");
}

/// Record a gate check-in.
pub fn record_check_in() {
    metrics::counter!("ticketgate_checkins_total").increment(1);
}

/// Record a service redemption.
pub fn record_redemption(kind: ServiceKind) {
    metrics::counter!("ticketgate_redemptions_total", "service" => kind.as_str()).increment(1);
}

/// Record a credential that failed verification.
pub fn record_credential_rejected() {
    metrics::counter!("ticketgate_credential_rejections_total").increment(1);
}

/// Record a finished sweep and its per-ticket failures.
pub fn record_sweep(expired: usize, failed: usize) {
    metrics::counter!("ticketgate_sweeps_total").increment(1);
    metrics::counter!("ticketgate_reservations_total", "status" => "expired")
        .increment(u64::try_from(expired).unwrap_or(u64::MAX));
    metrics::counter!("ticketgate_sweep_failures_total")
        .increment(u64::try_from(failed).unwrap_or(u64::MAX));
    tracing::debug!(expired, failed, "Recorded sweep metric");
}

/// Update the remaining-stock gauge for a ticket type.
pub fn update_stock_remaining(type_id: &TicketTypeId, remaining: u32) {
    metrics::gauge!("ticketgate_stock_remaining", "type_id" => type_id.as_str().to_owned())
        .set(f64::from(remaining));
}
