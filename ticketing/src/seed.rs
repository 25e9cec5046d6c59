//! Default stock seeding.

use ticketgate_core::{Money, TicketError, TicketStore, TicketType};
use tracing::{debug, info};

/// The stock a fresh deployment starts with.
#[must_use]
pub fn default_ticket_types() -> Vec<TicketType> {
    vec![
        TicketType::new("standard", Money::new(500_000), 100),
        TicketType::new("vip", Money::new(1_000_000), 50),
        TicketType::new("vvip", Money::new(2_500_000), 10),
    ]
}

/// Insert the default ticket types that do not exist yet.
///
/// Existing types keep their capacity and price. Returns how many were added.
///
/// # Errors
///
/// Returns [`TicketError::Storage`] on storage failure.
pub async fn seed_stock(store: &dyn TicketStore) -> Result<usize, TicketError> {
    let mut added = 0;
    for ticket_type in default_ticket_types() {
        let type_id = ticket_type.type_id.clone();
        if store.insert_ticket_type(ticket_type).await? {
            added += 1;
        } else {
            debug!(type_id = %type_id, "Ticket type already present, not seeded");
        }
    }
    info!(added, "Stock seeded");
    Ok(added)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ticketgate_testing::InMemoryTicketStore;

    #[tokio::test]
    async fn test_seed_skips_existing_types() {
        let store = InMemoryTicketStore::with_types([TicketType::new("vip", Money::new(1), 3)]);

        assert_eq!(seed_stock(&store).await.unwrap(), 2);
        assert_eq!(seed_stock(&store).await.unwrap(), 0);

        let types = store.ticket_types().await.unwrap();
        assert_eq!(types.len(), 3);
        let vip = types.iter().find(|t| t.type_id.as_str() == "vip").unwrap();
        assert_eq!(vip.total_capacity, 3);
        assert_eq!(vip.unit_price, Money::new(1));
    }
}
