// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! API key middleware for Axum.
//!
//! ```rust,ignore
//! let protected = Router::new()
//!     .route("/persons/{personId}/attributes", get(list_attributes))
//!     .route_layer(axum::middleware::from_fn_with_state(gate, require_api_key));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderName,
    middleware::Next,
    response::{IntoResponse, Response},
};
use ring::digest::{digest, SHA256};
use tracing::warn;

use super::AuthError;
use crate::config::{ApiKey, ConfigError, API_KEY_HEADER_ENV};

/// Expected credential and where to find it.
#[derive(Clone)]
pub struct ApiKeyGate {
    header: HeaderName,
    expected_digest: Arc<[u8]>,
}

impl ApiKeyGate {
    pub fn new(header: &str, api_key: &ApiKey) -> Result<Self, ConfigError> {
        let header = HeaderName::try_from(header).map_err(|e| ConfigError::Invalid {
            name: API_KEY_HEADER_ENV,
            value: header.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            header,
            expected_digest: Arc::from(digest(&SHA256, api_key.expose().as_bytes()).as_ref()),
        })
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Digests are compared so the comparison time does not depend on
    /// how much of the presented key matches.
    pub fn verify(&self, presented: Option<&str>) -> Result<(), AuthError> {
        let presented = presented
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingApiKey)?;
        let presented_digest = digest(&SHA256, presented.as_bytes());
        if presented_digest.as_ref() == &*self.expected_digest {
            Ok(())
        } else {
            Err(AuthError::InvalidApiKey)
        }
    }
}

pub async fn require_api_key(
    State(gate): State<ApiKeyGate>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(gate.header())
        .and_then(|v| v.to_str().ok());

    match gate.verify(presented) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            warn!(reason = %e, path = %request.uri().path(), "Rejected unauthenticated request");
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    fn gate() -> ApiKeyGate {
        ApiKeyGate::new("x-api-key", &ApiKey::new("secret-key")).unwrap()
    }

    #[test]
    fn verify_accepts_only_the_configured_key() {
        let gate = gate();
        assert_eq!(gate.verify(Some("secret-key")), Ok(()));
        assert_eq!(gate.verify(Some("secret")), Err(AuthError::InvalidApiKey));
        assert_eq!(gate.verify(Some("")), Err(AuthError::MissingApiKey));
        assert_eq!(gate.verify(None), Err(AuthError::MissingApiKey));
    }

    #[test]
    fn invalid_header_name_is_a_config_error() {
        let err = ApiKeyGate::new("bad header", &ApiKey::new("k")).err().unwrap();
        assert!(matches!(err, ConfigError::Invalid { name: "API_KEY_HEADER", .. }));
    }

    fn app() -> Router {
        Router::new()
            .route("/protected", get(|| async { "ok" }))
            .route_layer(axum::middleware::from_fn_with_state(gate(), require_api_key))
    }

    #[tokio::test]
    async fn request_without_key_is_rejected() {
        let response = app()
            .oneshot(Request::builder().uri("/protected").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn request_with_key_passes() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header("x-api-key", "secret-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
