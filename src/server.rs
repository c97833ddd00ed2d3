// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Server Lifecycle
//!
//! Startup order: connect the pool (bounded), run migrations, start the pool
//! monitor, bind the listener. Any failure aborts startup.
//!
//! ## Shutdown
//!
//! SIGINT or SIGTERM cancels a shared `CancellationToken`. The listener stops
//! accepting and in-flight requests get [`SHUTDOWN_GRACE`] to finish; then
//! pending audit writes are awaited and the pool is closed.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api;
use crate::auth::ApiKeyGate;
use crate::config::{redact_database_url, Config, ConfigError};
use crate::state::AppState;
use crate::storage::postgres::{PgStore, PoolMonitor, ACQUIRE_TIMEOUT};
use crate::storage::StoreError;

pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("database connection failed: {0}")]
    Database(StoreError),

    #[error("database migration failed: {0}")]
    Migration(StoreError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Run the service until a termination signal arrives.
pub async fn run(config: Config) -> Result<(), StartupError> {
    info!(
        database = %redact_database_url(&config.database_url),
        "Connecting to database"
    );
    let store = tokio::time::timeout(ACQUIRE_TIMEOUT, PgStore::connect(&config.database_url))
        .await
        .map_err(|_| {
            StartupError::Database(StoreError::Transient(
                "timed out waiting for database".to_string(),
            ))
        })?
        .map_err(StartupError::Database)?;
    info!("Database connection established");

    store.migrate().await.map_err(StartupError::Migration)?;

    let shutdown = CancellationToken::new();
    let monitor = tokio::spawn(PoolMonitor::new(store.clone()).run(shutdown.clone()));

    let gate = ApiKeyGate::new(&config.api_key_header, &config.api_key)?;
    let state = AppState::new(
        Arc::new(store.clone()),
        config.keys.clone(),
        gate,
        config.request_timeout,
    );
    let audit = state.audit.clone();
    let app = api::router(state);

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(
        %addr,
        key_version = config.keys.current_version(),
        "Person service listening (docs at /docs)"
    );

    let signals = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signals.cancel();
    });

    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => result.map_err(StartupError::Serve)?,
        _ = shutdown.cancelled() => {
            info!(grace_secs = SHUTDOWN_GRACE.as_secs(), "Draining in-flight requests");
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut serve).await {
                Ok(result) => result.map_err(StartupError::Serve)?,
                Err(_) => warn!("Shutdown grace period elapsed; dropping remaining connections"),
            }
        }
    }

    shutdown.cancel();
    if let Err(e) = monitor.await {
        warn!(error = %e, "Pool monitor task ended abnormally");
    }

    if tokio::time::timeout(SHUTDOWN_GRACE, audit.shutdown())
        .await
        .is_err()
    {
        warn!("Pending audit writes did not finish in time");
    }
    if audit.failure_count() > 0 {
        warn!(failures = audit.failure_count(), "Audit writes failed during this run");
    }

    store.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
