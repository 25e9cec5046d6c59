//! Process lifecycle and graceful shutdown.
//!
//! The [`Application`] owns the request-facing [`Services`] that scanner and
//! HTTP adapters drive, plus every background task.
//!
//! When a shutdown signal is received (Ctrl+C or SIGTERM):
//! 1. Shutdown broadcast to all background tasks
//! 2. Wait for each task to finish its current run (bounded by a timeout)
//! 3. Clean exit

use crate::admin::AdminService;
use crate::lifecycle::TicketLifecycle;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A named background task.
struct BackgroundTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Services that request adapters call into.
#[derive(Clone)]
pub struct Services {
    /// Buyer and scanner operations
    pub lifecycle: TicketLifecycle,
    /// Token-gated operator operations
    pub admin: AdminService,
}

/// Running application: services, background tasks, and the shutdown
/// broadcaster.
pub struct Application {
    services: Option<Services>,
    tasks: Vec<BackgroundTask>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl Application {
    /// Create an application that gives each task `shutdown_timeout` to stop.
    #[must_use]
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            services: None,
            tasks: Vec::new(),
            shutdown_tx,
            shutdown_timeout,
        }
    }

    /// Attach the request-facing services.
    #[must_use]
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = Some(services);
        self
    }

    /// The attached services, for adapters to clone handles from.
    #[must_use]
    pub const fn services(&self) -> Option<&Services> {
        self.services.as_ref()
    }

    /// A receiver that fires when shutdown begins.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Track a spawned task so shutdown waits for it.
    pub fn register(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.push(BackgroundTask { name, handle });
    }

    /// Run until Ctrl+C or SIGTERM, then shut down.
    pub async fn run(self) {
        info!(
            tasks = self.tasks.len(),
            services = self.services.is_some(),
            "Application running"
        );
        shutdown_signal().await;
        self.shutdown().await;
    }

    /// Broadcast shutdown and wait for every task.
    pub async fn shutdown(self) {
        info!("Initiating graceful shutdown...");
        // No receivers left just means every task already stopped.
        let _ = self.shutdown_tx.send(());

        for task in self.tasks {
            match tokio::time::timeout(self.shutdown_timeout, task.handle).await {
                Ok(Ok(())) => info!(task = task.name, "Task stopped gracefully"),
                Ok(Err(e)) => warn!(task = task.name, error = %e, "Task failed"),
                Err(_) => warn!(task = task.name, "Task shutdown timed out"),
            }
        }

        info!("Graceful shutdown complete");
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed, that signal is never observed and the
/// other one still works.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_shutdown_stops_registered_tasks() {
        let mut app = Application::new(Duration::from_secs(1));
        let stopped = Arc::new(AtomicBool::new(false));

        let mut rx = app.shutdown_receiver();
        let flag = Arc::clone(&stopped);
        app.register(
            "waiter",
            tokio::spawn(async move {
                let _ = rx.recv().await;
                flag.store(true, Ordering::SeqCst);
            }),
        );

        app.shutdown().await;
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_application_owns_services() {
        use ticketgate_core::environment::Clock;
        use ticketgate_core::{CredentialSigner, Money, TicketType};
        use ticketgate_testing::{
            InMemoryActivityRecorder, InMemoryTicketStore, MockClock, RecordingDelivery,
            test_clock,
        };

        let store = Arc::new(InMemoryTicketStore::with_types([TicketType::new(
            "standard",
            Money::new(500_000),
            2,
        )]));
        let clock = Arc::new(MockClock::starting_at(test_clock().now()));
        let recorder = Arc::new(InMemoryActivityRecorder::new());
        let lifecycle = TicketLifecycle::new(
            crate::LifecycleDeps {
                store: store.clone(),
                clock: clock.clone(),
                recorder: recorder.clone(),
                delivery: Arc::new(RecordingDelivery::new()),
            },
            CredentialSigner::new("runtime-secret").unwrap(),
            crate::LifecycleSettings::default(),
        );
        let admin = AdminService::new(Some("token".to_string()), store, recorder, clock);

        let app = Application::new(Duration::from_secs(1))
            .with_services(Services { lifecycle, admin });
        let services = app.services().cloned().unwrap();

        services.lifecycle.reserve("a@example.com", "standard", 1).await.unwrap();
        assert_eq!(services.admin.list_tickets("token").await.unwrap().len(), 1);

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_stuck_task_times_out() {
        let mut app = Application::new(Duration::from_millis(20));
        app.register("stuck", tokio::spawn(std::future::pending::<()>()));
        // Returns despite the task never finishing.
        app.shutdown().await;
    }
}
