// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::require_api_key,
    config::DEFAULT_API_KEY_HEADER,
    error::{ApiError, ErrorBody, ErrorCode},
    models::{
        AttributeResponse, HealthResponse, KeyValueResponse, MessageResponse, Meta,
        SetValueRequest, UpdateAttributeRequest, UpsertAttributeRequest,
    },
    state::AppState,
    trace::trace_middleware,
};

pub mod attributes;
pub mod health;
pub mod key_value;

pub fn router(state: AppState) -> Router {
    let persons = Router::new()
        .route(
            "/persons/{personId}/attributes",
            get(attributes::list_attributes)
                .put(attributes::upsert_attribute)
                .post(attributes::upsert_attribute),
        )
        .route(
            "/persons/{personId}/attributes/{attributeId}",
            get(attributes::get_attribute)
                .put(attributes::update_attribute)
                .delete(attributes::delete_attribute),
        )
        .route_layer(from_fn_with_state(
            state.api_key_gate.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/api/key-value", post(key_value::set_value))
        .route(
            "/api/key-value/",
            get(key_value::missing_key).delete(key_value::missing_key),
        )
        .route(
            "/api/key-value/{key}",
            get(key_value::get_value).delete(key_value::delete_value),
        )
        .merge(persons)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .fallback(route_not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(from_fn(trace_middleware))
}

async fn route_not_found() -> ApiError {
    ApiError::not_found(ErrorCode::RouteNotFound, "Not found")
}

struct ApiKeyAddon;

impl Modify for ApiKeyAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(DEFAULT_API_KEY_HEADER))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        key_value::set_value,
        key_value::get_value,
        key_value::delete_value,
        attributes::upsert_attribute,
        attributes::list_attributes,
        attributes::get_attribute,
        attributes::update_attribute,
        attributes::delete_attribute
    ),
    components(
        schemas(
            Meta,
            UpsertAttributeRequest,
            UpdateAttributeRequest,
            AttributeResponse,
            SetValueRequest,
            KeyValueResponse,
            MessageResponse,
            HealthResponse,
            ErrorBody,
            ErrorCode
        )
    ),
    modifiers(&ApiKeyAddon),
    tags(
        (name = "Health", description = "Liveness and database reachability"),
        (name = "KeyValue", description = "Public key/value store"),
        (name = "Attributes", description = "Encrypted, versioned person attributes")
    )
)]
struct ApiDoc;
