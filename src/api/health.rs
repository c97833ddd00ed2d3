// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};
use tracing::warn;

use crate::error::{ApiError, ErrorBody, ErrorCode};
use crate::models::HealthResponse;
use crate::state::AppState;

/// Liveness and database reachability.
///
/// Returns 200 when the pool answers a ping, 500 otherwise.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 500, description = "Database unreachable", body = ErrorBody)
    )
)]
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let ping = tokio::time::timeout(state.request_timeout, state.store.ping()).await;
    match ping {
        Ok(Ok(())) => Ok(Json(HealthResponse {
            status: "healthy".to_string(),
        })),
        Ok(Err(e)) => {
            warn!(error = %e, "Health check failed");
            Err(health_failed())
        }
        Err(_) => {
            warn!("Health check timed out");
            Err(health_failed())
        }
    }
}

fn health_failed() -> ApiError {
    ApiError::internal(ErrorCode::HealthCheckFailed, "Health check failed")
}
