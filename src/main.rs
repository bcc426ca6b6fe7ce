use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use link_dispenser::allocation::AllocationService;
use link_dispenser::config::{Args, ConfigError};
use link_dispenser::fanout::BroadcastFanout;
use link_dispenser::gateway::{DeliveryError, TwitterClient};
use link_dispenser::ledger::{FileStore, Ledger, LedgerError, StoreError, import_plain_lines};
use link_dispenser::server::{AppState, build_router};

/// How long shutdown waits for batches that were accepted but not finished.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot open ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("cannot import links: {0}")]
    Import(#[from] StoreError),

    #[error("cannot build platform client: {0}")]
    Client(#[from] DeliveryError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "link_dispenser=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    args.validate()?;

    let ledger = Ledger::open(FileStore::new(args.links_file.clone()))?;
    if let Some(path) = &args.import_links {
        if ledger.stats().total == 0 {
            let records = import_plain_lines(path)?;
            ledger.bulk_load(records)?;
        } else {
            debug!(path = %path.display(), "Ledger already populated, skipping import");
        }
    }
    let ledger = Arc::new(ledger);

    let client = Arc::new(TwitterClient::new(&args.api_base, &args.access_token)?);
    let allocation = AllocationService::new(ledger, client.clone(), client)
        .with_dm_failure_policy(args.dm_failure_policy)
        .with_delivery_timeout(args.delivery_timeout());

    if args.consumer_secret.is_none() {
        warn!("No consumer secret configured: webhook signatures will not be checked");
    }

    let shutdown = CancellationToken::new();
    let fanout = BroadcastFanout::default();
    tokio::spawn(log_activity(fanout.clone(), shutdown.clone()));

    let app_state = AppState::new(
        allocation,
        args.classifier_config(),
        Arc::new(fanout),
        args.consumer_secret.clone().map(String::into_bytes),
    );
    let tasks = app_state.tasks().clone();
    let app = build_router(app_state);

    let addr = args.listen_addr();
    info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tasks.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, tasks.wait()).await.is_err() {
        warn!(pending = tasks.len(), "Shutting down with batches still running");
    }

    info!("shut down");
    Ok(())
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for ctrl-c");
        return;
    }
    info!("ctrl-c received, shutting down");
    shutdown.cancel();
}

/// Logs every published webhook body until shutdown.
async fn log_activity(fanout: BroadcastFanout, shutdown: CancellationToken) {
    let mut rx = fanout.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            received = rx.recv() => match received {
                Ok(published) => debug!(
                    topic = %published.topic,
                    internal_id = %published.activity.internal_id,
                    received_at = %published.activity.received_at,
                    "Activity"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Activity log lagged"),
                Err(RecvError::Closed) => return,
            },
        }
    }
}
