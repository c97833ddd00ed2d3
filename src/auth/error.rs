// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::{ApiError, ErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Credential header absent or not valid ASCII
    MissingApiKey,
    /// Credential present but wrong
    InvalidApiKey,
}

impl AuthError {
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::AuthFailed
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingApiKey => write!(f, "API key is required"),
            AuthError::InvalidApiKey => write!(f, "Invalid API key"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::new(self.status_code(), self.error_code(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn missing_key_returns_401() {
        let response = AuthError::MissingApiKey.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["errorCode"], "auth_failed");
        assert_eq!(body["message"], "API key is required");
    }

    #[tokio::test]
    async fn invalid_key_returns_401() {
        let response = AuthError::InvalidApiKey.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
