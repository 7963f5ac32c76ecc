pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod health;
pub mod mailer;
pub mod routes;
pub mod service;
pub mod sweeper;

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use tireline_core::config::{AppConfig, LoadOptions, LogFormat};
use tireline_db::DbPool;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::routes::AppState;
use crate::sweeper::ExpirySweeper;

/// Full HTTP surface: quote routes, the health probe and request tracing.
pub fn app(state: AppState, db_pool: DbPool) -> Router {
    routes::router(state).merge(health::router(db_pool)).layer(TraceLayer::new_for_http())
}

pub fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);
    let installed = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        warn!(event_name = "system.logging.already_installed", "tracing subscriber already set");
    }
}

pub async fn run(
    options: LoadOptions,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    // Logging comes up before anything else can emit events.
    let config = AppConfig::load(options)?;
    init_logging(&config);

    let application = bootstrap::bootstrap_with_config(config).await?;
    let address = application.config.listen_address();
    let grace = Duration::from_secs(application.config.server.graceful_shutdown_secs);

    let (stop_tx, stop_rx) = watch::channel(false);
    let sweeper = ExpirySweeper::new(
        application.state.service.clone(),
        Duration::from_secs(application.config.quotes.expiry_sweep_secs),
    )
    .spawn(stop_rx.clone());

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "tireline-server listening"
    );

    let mut drained = stop_rx;
    let router = app(application.state.clone(), application.db_pool.clone());
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = stop_tx.send(true);
        });
    let server = tokio::spawn(async move { server.await });

    // Once shutdown is signalled, in-flight requests get `grace` to finish.
    let _ = drained.wait_for(|stopping| *stopping).await;
    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "tireline-server stopping"
    );
    match tokio::time::timeout(grace, server).await {
        Ok(joined) => joined??,
        Err(_) => warn!(
            event_name = "system.server.grace_elapsed",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "graceful shutdown window elapsed with requests in flight"
        ),
    }
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }
    application.db_pool.close().await;
    info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        "tireline-server stopped"
    );

    Ok(())
}
