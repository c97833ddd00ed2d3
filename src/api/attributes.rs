// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};

use crate::{
    attributes::{parse_attribute_id, parse_collection_person_id, parse_person_id},
    error::{ApiError, ErrorBody},
    models::{AttributeResponse, MessageResponse, UpdateAttributeRequest, UpsertAttributeRequest},
    state::AppState,
    trace::RequestContext,
};

/// Set an attribute. Always 201, also when an existing attribute was
/// overwritten; `version == 1` tells the two apart.
#[utoipa::path(
    put,
    path = "/persons/{personId}/attributes",
    params(("personId" = String, Path, description = "Person UUID")),
    request_body = UpsertAttributeRequest,
    tag = "Attributes",
    security(("api_key" = [])),
    responses(
        (status = 201, body = AttributeResponse),
        (status = 400, body = ErrorBody),
        (status = 401, body = ErrorBody),
        (status = 404, description = "Unknown or malformed person id", body = ErrorBody),
        (status = 500, body = ErrorBody)
    )
)]
pub async fn upsert_attribute(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(person_id): Path<String>,
    body: Result<Json<UpsertAttributeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AttributeResponse>), ApiError> {
    let person_id = parse_collection_person_id(&person_id)?;
    let Json(request) = body.map_err(|_| ApiError::invalid_body())?;

    let attribute = state.attributes.upsert(&ctx, person_id, request).await?;
    Ok((StatusCode::CREATED, Json(attribute.into())))
}

#[utoipa::path(
    get,
    path = "/persons/{personId}/attributes",
    params(("personId" = String, Path, description = "Person UUID")),
    tag = "Attributes",
    security(("api_key" = [])),
    responses(
        (status = 200, body = [AttributeResponse]),
        (status = 404, body = ErrorBody),
        (status = 500, body = ErrorBody)
    )
)]
pub async fn list_attributes(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(person_id): Path<String>,
) -> Result<Json<Vec<AttributeResponse>>, ApiError> {
    let person_id = parse_collection_person_id(&person_id)?;
    let attributes = state.attributes.list(&ctx, person_id).await?;
    Ok(Json(attributes.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/persons/{personId}/attributes/{attributeId}",
    params(
        ("personId" = String, Path, description = "Person UUID"),
        ("attributeId" = i64, Path, description = "Attribute id")
    ),
    tag = "Attributes",
    security(("api_key" = [])),
    responses(
        (status = 200, body = AttributeResponse),
        (status = 400, body = ErrorBody),
        (status = 404, body = ErrorBody),
        (status = 500, body = ErrorBody)
    )
)]
pub async fn get_attribute(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((person_id, attribute_id)): Path<(String, String)>,
) -> Result<Json<AttributeResponse>, ApiError> {
    let person_id = parse_person_id(&person_id)?;
    let attribute_id = parse_attribute_id(&attribute_id)?;
    let attribute = state.attributes.get(&ctx, person_id, attribute_id).await?;
    Ok(Json(attribute.into()))
}

/// Update value, optionally renaming the key or checking the version.
#[utoipa::path(
    put,
    path = "/persons/{personId}/attributes/{attributeId}",
    params(
        ("personId" = String, Path, description = "Person UUID"),
        ("attributeId" = i64, Path, description = "Attribute id")
    ),
    request_body = UpdateAttributeRequest,
    tag = "Attributes",
    security(("api_key" = [])),
    responses(
        (status = 200, body = AttributeResponse),
        (status = 400, body = ErrorBody),
        (status = 404, body = ErrorBody),
        (status = 409, description = "Stale version", body = ErrorBody),
        (status = 500, body = ErrorBody)
    )
)]
pub async fn update_attribute(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((person_id, attribute_id)): Path<(String, String)>,
    body: Result<Json<UpdateAttributeRequest>, JsonRejection>,
) -> Result<Json<AttributeResponse>, ApiError> {
    let person_id = parse_person_id(&person_id)?;
    let attribute_id = parse_attribute_id(&attribute_id)?;
    let Json(request) = body.map_err(|_| ApiError::invalid_body())?;

    let attribute = state
        .attributes
        .update(&ctx, person_id, attribute_id, request)
        .await?;
    Ok(Json(attribute.into()))
}

#[utoipa::path(
    delete,
    path = "/persons/{personId}/attributes/{attributeId}",
    params(
        ("personId" = String, Path, description = "Person UUID"),
        ("attributeId" = i64, Path, description = "Attribute id")
    ),
    tag = "Attributes",
    security(("api_key" = [])),
    responses(
        (status = 200, body = MessageResponse),
        (status = 400, body = ErrorBody),
        (status = 404, body = ErrorBody),
        (status = 500, body = ErrorBody)
    )
)]
pub async fn delete_attribute(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((person_id, attribute_id)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let person_id = parse_person_id(&person_id)?;
    let attribute_id = parse_attribute_id(&attribute_id)?;
    state
        .attributes
        .delete(&ctx, person_id, attribute_id)
        .await?;
    Ok(Json(MessageResponse::new("Attribute deleted successfully")))
}
