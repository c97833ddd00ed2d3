// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use tracing::error;

use crate::{
    error::{ApiError, ErrorBody, ErrorCode},
    models::{KeyValueResponse, MessageResponse, SetValueRequest},
    state::AppState,
    storage::StoreError,
    trace::RequestContext,
};

#[utoipa::path(
    post,
    path = "/api/key-value",
    request_body = SetValueRequest,
    tag = "KeyValue",
    responses(
        (status = 200, body = KeyValueResponse),
        (status = 400, body = ErrorBody),
        (status = 500, body = ErrorBody)
    )
)]
pub async fn set_value(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<SetValueRequest>, JsonRejection>,
) -> Result<Json<KeyValueResponse>, ApiError> {
    let Json(request) = body.map_err(|_| ApiError::invalid_body())?;
    if request.key.is_empty() || request.value.is_empty() {
        return Err(ApiError::bad_request(
            ErrorCode::MissingRequiredField,
            "Key and value are required",
        ));
    }

    let record = ctx
        .bounded(state.store.set_key_value(&request.key, &request.value))
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to set value");
            ApiError::internal(ErrorCode::CreateFailed, "Failed to set value")
        })?;
    Ok(Json(record.into()))
}

#[utoipa::path(
    get,
    path = "/api/key-value/{key}",
    params(("key" = String, Path, description = "Key to look up")),
    tag = "KeyValue",
    responses(
        (status = 200, body = KeyValueResponse),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn get_value(
    Path(key): Path<String>,
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<KeyValueResponse>, ApiError> {
    match ctx.bounded(state.store.get_key_value(&key)).await {
        Ok(record) => Ok(Json(record.into())),
        Err(StoreError::NotFound) => Err(ApiError::not_found(
            ErrorCode::KeyNotFound,
            "Key not found",
        )),
        Err(e) => {
            error!(error = %e, "Failed to retrieve value");
            Err(ApiError::internal(
                ErrorCode::RetrieveFailed,
                "Failed to retrieve value",
            ))
        }
    }
}

/// Deleting an absent key still answers 200.
#[utoipa::path(
    delete,
    path = "/api/key-value/{key}",
    params(("key" = String, Path, description = "Key to delete")),
    tag = "KeyValue",
    responses(
        (status = 200, body = MessageResponse),
        (status = 500, body = ErrorBody)
    )
)]
pub async fn delete_value(
    Path(key): Path<String>,
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<MessageResponse>, ApiError> {
    ctx.bounded(state.store.delete_key_value(&key))
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to delete value");
            ApiError::internal(ErrorCode::DeleteFailed, "Failed to delete value")
        })?;
    Ok(Json(MessageResponse::new("Key deleted successfully")))
}

/// `GET`/`DELETE /api/key-value/` with nothing after the slash.
pub async fn missing_key() -> ApiError {
    ApiError::bad_request(ErrorCode::MissingRequiredField, "Key parameter is required")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    use crate::config::ApiKey;
    use crate::crypto::{EncryptionKey, KeyRing};
    use crate::storage::memory::{MemoryStore, StoreOp};

    fn state(store: Arc<MemoryStore>) -> AppState {
        AppState::with_store(
            store,
            KeyRing::single(EncryptionKey::new("k")),
            &ApiKey::new("api"),
        )
        .unwrap()
    }

    fn ctx() -> RequestContext {
        RequestContext::new("t", Instant::now() + Duration::from_secs(5))
    }

    fn set_request(key: &str, value: &str) -> Result<Json<SetValueRequest>, JsonRejection> {
        Ok(Json(SetValueRequest {
            key: key.into(),
            value: value.into(),
        }))
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let state = state(Arc::new(MemoryStore::new()));
        let Json(created) = set_value(State(state.clone()), ctx(), set_request("color", "blue"))
            .await
            .unwrap();
        assert_eq!(created.value, "blue");
        assert!(created.created_at.is_some());

        let Json(read) = get_value(Path("color".into()), State(state), ctx())
            .await
            .unwrap();
        assert_eq!(read, created);
    }

    #[tokio::test]
    async fn set_requires_key_and_value() {
        let state = state(Arc::new(MemoryStore::new()));
        let err = set_value(State(state), ctx(), set_request("color", ""))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Key and value are required");
    }

    #[tokio::test]
    async fn get_missing_key_is_404() {
        let state = state(Arc::new(MemoryStore::new()));
        let err = get_value(Path("nope".into()), State(state), ctx())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, ErrorCode::KeyNotFound);
    }

    #[tokio::test]
    async fn delete_answers_200_even_when_absent() {
        let state = state(Arc::new(MemoryStore::new()));
        let Json(body) = delete_value(Path("nope".into()), State(state), ctx())
            .await
            .unwrap();
        assert_eq!(body.message, "Key deleted successfully");
    }

    #[tokio::test]
    async fn storage_failure_maps_to_500() {
        let store = Arc::new(MemoryStore::new());
        store
            .fail_on(StoreOp::SetKeyValue, StoreError::Transient("down".into()))
            .await;
        let err = set_value(State(state(store)), ctx(), set_request("k", "v"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Failed to set value");
    }
}
