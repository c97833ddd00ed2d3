// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the REST API. All types derive
//! `ToSchema` for the OpenAPI document.
//!
//! ## Model Categories
//!
//! - **Attributes**: camelCase bodies of the `/persons/{personId}/attributes`
//!   surface, including the caller `meta` block used for auditing
//! - **Key/Value**: snake_case bodies of the public `/api/key-value` surface
//! - **Common**: message and health responses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::{Attribute, KeyValueRecord};

// =============================================================================
// Attribute Models
// =============================================================================

/// Who is asking and why. A non-empty `traceId` turns on auditing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default)]
    pub caller: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub trace_id: Option<String>,
}

impl Meta {
    /// Trace id to audit under, if any.
    pub fn audit_trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref().filter(|t| !t.is_empty())
    }
}

/// Body of `PUT|POST /persons/{personId}/attributes`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpsertAttributeRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub meta: Option<Meta>,
}

/// Body of `PUT /persons/{personId}/attributes/{attributeId}`.
///
/// A `key` different from the stored one renames the attribute; `version`
/// turns on optimistic locking.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAttributeRequest {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub meta: Option<Meta>,
}

/// A decrypted attribute as returned by every attribute endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttributeResponse {
    pub id: i64,
    pub key: String,
    pub value: String,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Attribute> for AttributeResponse {
    fn from(attribute: Attribute) -> Self {
        Self {
            id: attribute.id,
            key: attribute.key,
            value: attribute.value,
            version: attribute.version,
            created_at: attribute.created_at,
            updated_at: attribute.updated_at,
        }
    }
}

// =============================================================================
// Key/Value Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SetValueRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct KeyValueResponse {
    pub key: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<KeyValueRecord> for KeyValueResponse {
    fn from(record: KeyValueRecord) -> Self {
        Self {
            key: record.key,
            value: record.value,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

// =============================================================================
// Common
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
}
