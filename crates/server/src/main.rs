//! livepoll-rs server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use livepoll_api::{AppState, app};
use livepoll_common::Config;
use livepoll_core::{
    ChangeWatcher, NotificationHub, PollService, PollStatusUpdater, VotingTokenService,
};
use livepoll_db::repositories::{PollRepository, VoteRepository};
use livepoll_queue::{SchedulerConfig, run_scheduler};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livepoll=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting livepoll-rs server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database, falling back to an in-memory store if configured
    let db = Arc::new(livepoll_db::init(&config).await?);

    info!("Running database migrations...");
    livepoll_db::migrate(&db).await?;
    info!("Migrations completed");

    if config.auth.disabled {
        warn!("Authorization is disabled; every caller may manage every poll");
    }

    // Initialize repositories
    let poll_repo = PollRepository::new(Arc::clone(&db));
    let vote_repo = VoteRepository::new(Arc::clone(&db));

    // Committed changes are pushed to WebSocket subscribers through the hub
    let hub = NotificationHub::new(poll_repo.clone());
    let publisher = Arc::new(hub.clone());

    // Initialize services
    let poll_service = PollService::new(poll_repo.clone(), vote_repo, publisher.clone())
        .with_auth_disabled(config.auth.disabled);
    let change_watcher = ChangeWatcher::new(poll_repo.clone(), &config.long_poll);
    let voting_tokens = VotingTokenService::new(&config.auth.voter_token_secret);

    // Start the poll status scheduler
    let status_updater = Arc::new(PollStatusUpdater::new(poll_repo, publisher));
    let scheduler = run_scheduler(SchedulerConfig::from(&config.scheduler), status_updater);

    let state = AppState {
        poll_service,
        change_watcher,
        hub,
        voting_tokens,
        auth_disabled: config.auth.disabled,
    };

    // Build router
    let app = app(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.abort();
    info!("Server shutdown complete");
    Ok(())
}
