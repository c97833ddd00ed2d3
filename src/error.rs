// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

/// Stable machine-readable error identifiers returned as `errorCode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequestBody,
    MissingRequiredField,
    InvalidPersonId,
    InvalidAttributeId,
    PersonNotFound,
    AttributeNotFound,
    KeyNotFound,
    VersionConflict,
    VerifyPersonFailed,
    RetrieveFailed,
    CreateFailed,
    UpdateFailed,
    DeleteFailed,
    AuthFailed,
    HealthCheckFailed,
    RouteNotFound,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequestBody => "invalid_request_body",
            ErrorCode::MissingRequiredField => "missing_required_field",
            ErrorCode::InvalidPersonId => "invalid_person_id",
            ErrorCode::InvalidAttributeId => "invalid_attribute_id",
            ErrorCode::PersonNotFound => "person_not_found",
            ErrorCode::AttributeNotFound => "attribute_not_found",
            ErrorCode::KeyNotFound => "key_not_found",
            ErrorCode::VersionConflict => "version_conflict",
            ErrorCode::VerifyPersonFailed => "verify_person_failed",
            ErrorCode::RetrieveFailed => "retrieve_failed",
            ErrorCode::CreateFailed => "create_failed",
            ErrorCode::UpdateFailed => "update_failed",
            ErrorCode::DeleteFailed => "delete_failed",
            ErrorCode::AuthFailed => "auth_failed",
            ErrorCode::HealthCheckFailed => "health_check_failed",
            ErrorCode::RouteNotFound => "route_not_found",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
}

/// Error body: `{ "message": ..., "errorCode": ... }`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub error_code: ErrorCode,
}

impl ApiError {
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn bad_request(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn internal(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    /// The body every invalid JSON payload gets.
    pub fn invalid_body() -> Self {
        Self::bad_request(ErrorCode::InvalidRequestBody, "Invalid request body")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            message: self.message,
            error_code: self.code,
        });
        (self.status, body).into_response()
    }
}
