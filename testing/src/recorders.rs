//! Recording doubles for the lifecycle's outbound collaborators.

use std::future::{Future, ready};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use ticketgate_core::{
    ActivityAction, ActivityError, ActivityEvent, ActivityFuture, ActivityRecorder,
    CredentialDelivery, CredentialPayload, DeliveryError,
};

/// Activity recorder that keeps events in memory, oldest first.
#[derive(Debug, Clone, Default)]
pub struct InMemoryActivityRecorder {
    events: Arc<Mutex<Vec<ActivityEvent>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryActivityRecorder {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `record` fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything recorded so far
    #[must_use]
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Actions recorded so far, in order
    #[must_use]
    pub fn actions(&self) -> Vec<ActivityAction> {
        self.events().into_iter().map(|e| e.action).collect()
    }
}

impl ActivityRecorder for InMemoryActivityRecorder {
    fn record(&self, event: ActivityEvent) -> ActivityFuture<'_, ()> {
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(ActivityError::Sink("recorder offline".to_string()))
        } else {
            self.events
                .lock()
                .map(|mut events| events.push(event))
                .map_err(|_| ActivityError::Sink("recorder lock poisoned".to_string()))
        };
        Box::pin(ready(result))
    }

    fn recent(&self, limit: usize) -> ActivityFuture<'_, Vec<ActivityEvent>> {
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(ActivityError::Sink("recorder offline".to_string()))
        } else {
            Ok(self.events().into_iter().rev().take(limit).collect())
        };
        Box::pin(ready(result))
    }
}

/// Credential delivery that captures payloads instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct RecordingDelivery {
    payloads: Arc<Mutex<Vec<CredentialPayload>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingDelivery {
    /// Create an empty delivery recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent delivery fail (payloads are still captured)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Payloads delivered so far
    #[must_use]
    pub fn payloads(&self) -> Vec<CredentialPayload> {
        self.payloads.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl CredentialDelivery for RecordingDelivery {
    fn deliver(
        &self,
        payload: CredentialPayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + '_>> {
        if let Ok(mut payloads) = self.payloads.lock() {
            payloads.push(payload);
        }
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(DeliveryError("mailer offline".to_string()))
        } else {
            Ok(())
        };
        Box::pin(ready(result))
    }
}
