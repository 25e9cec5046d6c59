//! Ticketgate server.
//!
//! Connects storage, seeds default stock, exports metrics, and runs the
//! expiry sweeper until Ctrl+C or SIGTERM.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use ticketgate_core::environment::{Clock, SystemClock};
use ticketgate_core::{ActivityRecorder, CredentialSigner, TicketStore};
use ticketgate_postgres::{PostgresActivityRecorder, PostgresTicketStore, connect_pool, migrate};
use ticketing::config::ActivitySink;
use ticketing::{
    AdminService, Application, Config, ExpirySweeper, JsonFileActivityRecorder, LifecycleDeps,
    LifecycleSettings, LoggingDelivery, Services, TicketLifecycle, metrics, seed,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ticketing=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ticketgate");

    let config = Config::from_env();
    info!(
        expiry_minutes = config.lifecycle.pending_expire_minutes,
        sweep_interval_secs = config.lifecycle.sweep_interval_secs,
        activity_sink = ?config.activity.sink,
        "Configuration loaded"
    );

    // Storage
    info!("Connecting to database...");
    let pool = connect_pool(
        &config.postgres.url,
        config.postgres.max_connections,
        config.postgres.min_connections,
        std::time::Duration::from_secs(config.postgres.connect_timeout),
    )
    .await
    .context("database connection")?;
    migrate(&pool).await.context("database migrations")?;
    info!("Database ready");

    let store: Arc<dyn TicketStore> = Arc::new(PostgresTicketStore::new(pool.clone()));
    seed::seed_stock(store.as_ref()).await.context("stock seeding")?;

    // Metrics
    let metrics_addr: SocketAddr =
        format!("{}:{}", config.server.metrics_host, config.server.metrics_port)
            .parse()
            .context("metrics address")?;
    metrics::install_exporter(metrics_addr)?;

    // Collaborators
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let recorder: Arc<dyn ActivityRecorder> = match config.activity.sink {
        ActivitySink::File => Arc::new(JsonFileActivityRecorder::new(
            &config.activity.file,
            config.activity.max_entries,
        )),
        ActivitySink::Postgres => Arc::new(
            PostgresActivityRecorder::new(pool.clone()).with_retention(config.activity.max_entries),
        ),
    };
    let signer = CredentialSigner::new(config.credential_secret()?)?;

    let lifecycle = TicketLifecycle::new(
        LifecycleDeps {
            store: Arc::clone(&store),
            clock: Arc::clone(&clock),
            recorder: Arc::clone(&recorder),
            delivery: Arc::new(LoggingDelivery),
        },
        signer,
        LifecycleSettings {
            expiry_window: config.expiry_window(),
            max_tickets_per_order: config.lifecycle.max_tickets_per_order,
            event_name: config.lifecycle.event_name.clone(),
        },
    );
    let admin = AdminService::new(
        config.admin.token.clone(),
        Arc::clone(&store),
        Arc::clone(&recorder),
        Arc::clone(&clock),
    );
    if config.admin.token.is_none() {
        tracing::warn!("ADMIN_TOKEN is not set; admin operations are disabled");
    }

    for row in lifecycle.ledger().summary().await? {
        info!(
            type_id = %row.type_id,
            total = row.total_capacity,
            sold = row.sold,
            reserved = row.reserved,
            remaining = row.remaining,
            "Stock"
        );
    }

    // Background tasks
    let mut app =
        Application::new(config.shutdown_timeout()).with_services(Services { lifecycle, admin });
    let sweeper = ExpirySweeper::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        Arc::clone(&recorder),
        config.expiry_window(),
        config.sweep_interval(),
    );
    app.register("expiry-sweeper", sweeper.spawn(app.shutdown_receiver()));

    app.run().await;
    Ok(())
}
