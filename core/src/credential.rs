//! Ticket credentials: signing, verification, and the QR payload.
//!
//! A credential is `hex(HMAC-SHA256(secret, ticket_id || buyer))`. It carries
//! no expiry of its own; it stays valid for as long as the ticket exists.

use crate::types::{BuyerIdentity, Ticket, TicketId, TicketTypeId};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Errors constructing a [`CredentialSigner`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The signing secret is empty.
    #[error("Credential secret must not be empty")]
    EmptySecret,

    /// The MAC rejected the key.
    #[error("Invalid credential key")]
    InvalidKey,
}

/// Keyed signer binding a ticket id to its buyer.
#[derive(Clone)]
pub struct CredentialSigner {
    mac: HmacSha256,
}

impl CredentialSigner {
    /// Creates a signer from the server-held secret.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::EmptySecret`] for an empty secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, CredentialError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(CredentialError::EmptySecret);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| CredentialError::InvalidKey)?;
        Ok(Self { mac })
    }

    fn keyed(&self, ticket_id: &TicketId, buyer: &BuyerIdentity) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(ticket_id.to_string().as_bytes());
        mac.update(buyer.as_str().as_bytes());
        mac
    }

    /// Deterministic token for `(ticket_id, buyer)`.
    #[must_use]
    pub fn sign(&self, ticket_id: &TicketId, buyer: &BuyerIdentity) -> String {
        hex::encode(self.keyed(ticket_id, buyer).finalize().into_bytes())
    }

    /// Recompute and compare in constant time.
    ///
    /// Malformed tokens (not hex, wrong length) simply fail.
    #[must_use]
    pub fn verify(&self, token: &str, ticket_id: &TicketId, buyer: &BuyerIdentity) -> bool {
        let Ok(presented) = hex::decode(token.trim()) else {
            return false;
        };
        self.keyed(ticket_id, buyer).verify_slice(&presented).is_ok()
    }
}

impl fmt::Debug for CredentialSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSigner").finish_non_exhaustive()
    }
}

/// Payload encoded into the venue QR code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPayload {
    /// Event name
    pub event: String,
    /// Ticket id
    pub ticket_id: TicketId,
    /// Normalized buyer identity
    pub buyer_email: String,
    /// Ticket type
    pub ticket_type: TicketTypeId,
    /// Admissions covered
    pub quantity: u32,
    /// Credential token
    pub hash: String,
}

impl CredentialPayload {
    /// Build the payload for a paid ticket. `None` if no credential is attached.
    #[must_use]
    pub fn for_ticket(event: impl Into<String>, ticket: &Ticket) -> Option<Self> {
        let credential = ticket.credential.as_ref()?;
        Some(Self {
            event: event.into(),
            ticket_id: ticket.id,
            buyer_email: ticket.buyer.as_str().to_string(),
            ticket_type: ticket.type_id.clone(),
            quantity: ticket.quantity,
            hash: credential.token.clone(),
        })
    }

    /// JSON string to render as a QR image.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if encoding fails.
    pub fn to_qr_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Errors from credential delivery collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Credential delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Hands a freshly issued credential to whatever renders and sends it
/// (QR image, email). Called once, after `Reserved -> Paid` commits.
pub trait CredentialDelivery: Send + Sync {
    /// Deliver the payload to the buyer.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] if delivery fails. The payment stays committed.
    fn deliver(
        &self,
        payload: CredentialPayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Credential, Money, TicketType};
    use chrono::Utc;
    use proptest::prelude::*;

    fn buyer(raw: &str) -> BuyerIdentity {
        BuyerIdentity::parse(raw).unwrap()
    }

    #[test]
    fn test_sign_is_deterministic() {
        let signer = CredentialSigner::new("secret").unwrap();
        let id = TicketId::new();
        let a = signer.sign(&id, &buyer("a@example.com"));
        let b = signer.sign(&id, &buyer("a@example.com"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let signer = CredentialSigner::new("secret").unwrap();
        let other = CredentialSigner::new("other-secret").unwrap();
        let id = TicketId::new();
        let token = other.sign(&id, &buyer("a@example.com"));
        assert!(!signer.verify(&token, &id, &buyer("a@example.com")));
    }

    #[test]
    fn test_malformed_tokens_fail() {
        let signer = CredentialSigner::new("secret").unwrap();
        let id = TicketId::new();
        let b = buyer("a@example.com");
        assert!(!signer.verify("", &id, &b));
        assert!(!signer.verify("not-hex", &id, &b));
        assert!(!signer.verify("abcd", &id, &b));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert_eq!(CredentialSigner::new("").unwrap_err(), CredentialError::EmptySecret);
    }

    #[test]
    fn test_payload_requires_credential() {
        let ticket_type = TicketType::new("vip", Money::new(1_000_000), 5);
        let ticket = Ticket::reserve(
            TicketId::new(),
            buyer("a@example.com"),
            &ticket_type,
            1,
            Utc::now(),
        )
        .unwrap();
        assert!(CredentialPayload::for_ticket("Fest", &ticket).is_none());

        let paid = ticket
            .confirm_payment(Credential { token: "ff".into(), issued_at: Utc::now() })
            .unwrap();
        let payload = CredentialPayload::for_ticket("Fest", &paid).unwrap();
        let qr = payload.to_qr_string().unwrap();
        assert!(qr.contains("\"buyerEmail\":\"a@example.com\""));
        assert!(qr.contains("\"hash\":\"ff\""));
    }

    proptest! {
        #[test]
        fn prop_round_trip_and_tamper(
            secret in "[a-zA-Z0-9]{1,32}",
            email in "[a-z]{1,12}@[a-z]{1,8}\\.com",
            other_email in "[a-z]{1,12}@[a-z]{1,8}\\.org",
        ) {
            let signer = CredentialSigner::new(&secret).unwrap();
            let id = TicketId::new();
            let owner = buyer(&email);
            let token = signer.sign(&id, &owner);

            prop_assert!(signer.verify(&token, &id, &owner));
            prop_assert!(!signer.verify(&token, &TicketId::new(), &owner));
            prop_assert!(!signer.verify(&token, &id, &buyer(&other_email)));

            let mut tampered = token.clone().into_bytes();
            tampered[0] = if tampered[0] == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(tampered).unwrap();
            prop_assert!(!signer.verify(&tampered, &id, &owner));
        }
    }
}
