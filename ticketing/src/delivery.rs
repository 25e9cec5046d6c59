//! Credential delivery that only logs.
//!
//! Rendering the QR image and emailing it are handled outside this service;
//! the binary wires this delivery so every issued credential is at least
//! traceable in the logs.

use std::future::{Future, ready};
use std::pin::Pin;
use ticketgate_core::{CredentialDelivery, CredentialPayload, DeliveryError};

/// Logs each payload at `info`, without the token.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDelivery;

impl CredentialDelivery for LoggingDelivery {
    fn deliver(
        &self,
        payload: CredentialPayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + '_>> {
        let result = payload
            .to_qr_string()
            .map(|qr| {
                tracing::info!(
                    ticket_id = %payload.ticket_id,
                    buyer = %payload.buyer_email,
                    ticket_type = %payload.ticket_type,
                    quantity = payload.quantity,
                    qr_bytes = qr.len(),
                    "Credential ready for delivery"
                );
            })
            .map_err(|e| DeliveryError(e.to_string()));
        Box::pin(ready(result))
    }
}
