//! Outbox worker
//!
//! Delivers notification messages that the inline attempt after a payment
//! decision did not deliver. Runs against `PostgreSQL` until interrupted.
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://... cargo run --bin outbox-worker
//! ```

use shackles_core::environment::SystemClock;
use shackles_registration::{
    notifications::{ConsoleMailer, DisabledMailer, Mailer, NotificationDispatcher},
    store::PostgresStore,
    Config,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shackles_registration=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    shackles_registration::metrics::register_business_metrics();

    let config = Config::from_env();
    config.validate()?;

    info!(
        poll_interval = config.outbox.poll_interval,
        batch_size = config.outbox.batch_size,
        "Starting outbox worker"
    );

    let store = PostgresStore::connect(&config.database).await?;
    store.migrate().await?;

    let mailer: Arc<dyn Mailer> = if config.notifications.enabled {
        Arc::new(ConsoleMailer::new(config.notifications.from.clone()))
    } else {
        warn!("Notifications disabled, pending messages will be skipped");
        Arc::new(DisabledMailer)
    };
    let dispatcher = NotificationDispatcher::new(
        Arc::new(store),
        mailer,
        Arc::new(SystemClock),
        config.notifications.max_attempts,
    )
    .with_claim_timeout(config.notifications.claim_timeout());

    let poll_interval = Duration::from_secs(config.outbox.poll_interval.max(1));
    let mut interval = tokio::time::interval(poll_interval);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = interval.tick() => {
                match dispatcher.drain(config.outbox.batch_size).await {
                    Ok(report) if report.sent + report.skipped + report.failed > 0 => info!(
                        sent = report.sent,
                        skipped = report.skipped,
                        failed = report.failed,
                        "Outbox drained"
                    ),
                    Ok(_) => {},
                    Err(err) => error!(error = %err, "Outbox drain failed"),
                }
            },
        }
    }

    info!("Outbox worker stopped");
    Ok(())
}

/// Graceful shutdown signal handler.
///
/// Waits for:
/// - Ctrl+C (SIGINT)
/// - SIGTERM (in production environments)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
