//! # Ticketgate Testing
//!
//! Test doubles for the Ticketgate ticket lifecycle.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], advanceable [`MockClock`])
//! - [`InMemoryTicketStore`]: a single-lock store honouring every atomicity
//!   guarantee of the `TicketStore` contract, with fault injection
//! - [`InMemoryActivityRecorder`] and [`RecordingDelivery`] to assert on
//!   what the lifecycle emitted
//!
//! ## Example
//!
//! ```ignore
//! use ticketgate_testing::{InMemoryTicketStore, MockClock, test_clock};
//!
//! let clock = MockClock::starting_at(test_clock().now());
//! let standard = TicketType::new("standard", Money::new(500_000), 1);
//! let store = InMemoryTicketStore::with_types([standard]);
//! ```

use chrono::{DateTime, Utc};
use ticketgate_core::environment::Clock;

mod recorders;
mod store;

pub use recorders::{InMemoryActivityRecorder, RecordingDelivery};
pub use store::InMemoryTicketStore;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the lifecycle manager.
    #[derive(Debug, Clone)]
    pub struct MockClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl MockClock {
        /// Create a clock reading `time`
        #[must_use]
        pub fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_089))
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, MockClock, test_clock};
