// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Person Attributes
//!
//! Encrypted, versioned attributes keyed by `(personId, key)`.
//!
//! ## Lifecycle
//!
//! ```text
//! Absent --upsert--> Live(1)
//! Live(v) --upsert | update(version = v)--> Live(v + 1)
//! Live(v) --update(version = w, w != v)--> Live(v)     (409)
//! Live(v) --delete | rename--> Absent
//! ```
//!
//! A rename deletes the row and creates a new one under the new key, so the
//! attribute id changes and the version restarts at 1.
//!
//! Mutations that carry a non-empty `meta.traceId` are audited through
//! [`AuditWriter`] once the write has succeeded.

use std::sync::Arc;

use axum::http::StatusCode;
use tracing::{error, info};
use uuid::Uuid;

use crate::audit::{request_payload, AuditWriter};
use crate::crypto::KeyRing;
use crate::error::{ApiError, ErrorCode};
use crate::models::{Meta, UpdateAttributeRequest, UpsertAttributeRequest};
use crate::storage::{Attribute, NewAuditEntry, Store, StoreError};
use crate::trace::RequestContext;

pub const VERSION_CONFLICT_MESSAGE: &str =
    "Version conflict: attribute has been modified by another request";

#[derive(Debug, thiserror::Error)]
pub enum AttributeError {
    /// Malformed person id on the collection routes, reported as a miss.
    #[error("malformed person id")]
    UnknownPersonId,
    #[error("invalid person id format")]
    InvalidPersonId,
    #[error("invalid attribute id format")]
    InvalidAttributeId,
    #[error("key is required")]
    KeyRequired,
    #[error("meta is missing")]
    MissingMeta,
    #[error("meta caller and reason are required")]
    MetaFieldsRequired,
    #[error("value is required")]
    ValueRequired,
    #[error("person not found")]
    PersonNotFound,
    /// Person miss on the single-attribute write routes.
    #[error("person not found")]
    PersonMissing,
    #[error("attribute not found")]
    AttributeNotFound,
    #[error("version conflict")]
    VersionConflict,
    #[error("failed to verify person: {0}")]
    VerifyPerson(StoreError),
    #[error("failed to retrieve attributes: {0}")]
    RetrieveAttributes(StoreError),
    #[error("failed to create attribute: {0}")]
    Create(StoreError),
    #[error("failed to retrieve attribute: {0}")]
    Retrieve(StoreError),
    #[error("failed to update attribute key: {0}")]
    UpdateKey(StoreError),
    #[error("failed to update attribute: {0}")]
    Update(StoreError),
    #[error("failed to retrieve updated attribute: {0}")]
    RetrieveUpdated(StoreError),
    #[error("failed to delete attribute: {0}")]
    Delete(StoreError),
}

impl From<AttributeError> for ApiError {
    fn from(e: AttributeError) -> Self {
        use AttributeError::*;
        let (status, code, message) = match &e {
            UnknownPersonId => (
                StatusCode::NOT_FOUND,
                ErrorCode::InvalidPersonId,
                "Person not found",
            ),
            InvalidPersonId => (
                StatusCode::BAD_REQUEST,
                ErrorCode::InvalidPersonId,
                "Invalid person ID format",
            ),
            InvalidAttributeId => (
                StatusCode::BAD_REQUEST,
                ErrorCode::InvalidAttributeId,
                "Invalid attribute ID format",
            ),
            KeyRequired => (
                StatusCode::BAD_REQUEST,
                ErrorCode::MissingRequiredField,
                "Key is required",
            ),
            MissingMeta => (
                StatusCode::BAD_REQUEST,
                ErrorCode::MissingRequiredField,
                "Missing required field \"meta\"",
            ),
            MetaFieldsRequired => (
                StatusCode::BAD_REQUEST,
                ErrorCode::MissingRequiredField,
                "Meta fields (caller, reason) are required",
            ),
            ValueRequired => (
                StatusCode::BAD_REQUEST,
                ErrorCode::MissingRequiredField,
                "Value is required",
            ),
            PersonNotFound => (
                StatusCode::NOT_FOUND,
                ErrorCode::PersonNotFound,
                "Person not found",
            ),
            PersonMissing => (
                StatusCode::NOT_FOUND,
                ErrorCode::PersonNotFound,
                "Not found",
            ),
            AttributeNotFound => (
                StatusCode::NOT_FOUND,
                ErrorCode::AttributeNotFound,
                "Attribute not found",
            ),
            VersionConflict => (
                StatusCode::CONFLICT,
                ErrorCode::VersionConflict,
                VERSION_CONFLICT_MESSAGE,
            ),
            VerifyPerson(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::VerifyPersonFailed,
                "Failed to verify person",
            ),
            RetrieveAttributes(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::RetrieveFailed,
                "Failed to retrieve attributes",
            ),
            Create(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::CreateFailed,
                "Failed to create attribute",
            ),
            Retrieve(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::RetrieveFailed,
                "Failed to retrieve attribute",
            ),
            UpdateKey(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::UpdateFailed,
                "Failed to update attribute key",
            ),
            Update(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::UpdateFailed,
                "Failed to update attribute",
            ),
            RetrieveUpdated(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::RetrieveFailed,
                "Failed to retrieve updated attribute",
            ),
            Delete(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::DeleteFailed,
                "Failed to delete attribute",
            ),
        };
        if status.is_server_error() {
            error!(error = %e, "Attribute request failed");
        }
        ApiError::new(status, code, message)
    }
}

/// Person id on `/persons/{personId}/attributes`: malformed means unknown.
pub fn parse_collection_person_id(raw: &str) -> Result<Uuid, AttributeError> {
    Uuid::parse_str(raw).map_err(|_| AttributeError::UnknownPersonId)
}

/// Person id on `/persons/{personId}/attributes/{attributeId}`.
pub fn parse_person_id(raw: &str) -> Result<Uuid, AttributeError> {
    Uuid::parse_str(raw).map_err(|_| AttributeError::InvalidPersonId)
}

pub fn parse_attribute_id(raw: &str) -> Result<i64, AttributeError> {
    raw.parse::<i64>()
        .map_err(|_| AttributeError::InvalidAttributeId)
}

#[derive(Clone)]
pub struct AttributeService {
    store: Arc<dyn Store>,
    keys: Arc<KeyRing>,
    audit: AuditWriter,
}

impl AttributeService {
    pub fn new(store: Arc<dyn Store>, keys: Arc<KeyRing>, audit: AuditWriter) -> Self {
        Self { store, keys, audit }
    }

    #[cfg(test)]
    pub fn audit(&self) -> &AuditWriter {
        &self.audit
    }

    /// Insert the attribute or overwrite its value, then read it back.
    pub async fn upsert(
        &self,
        ctx: &RequestContext,
        person_id: Uuid,
        req: UpsertAttributeRequest,
    ) -> Result<Attribute, AttributeError> {
        if req.key.trim().is_empty() {
            return Err(AttributeError::KeyRequired);
        }
        let meta = req.meta.as_ref().ok_or(AttributeError::MissingMeta)?;
        if meta.caller.is_empty() || meta.reason.is_empty() {
            return Err(AttributeError::MetaFieldsRequired);
        }

        self.ensure_person(ctx, person_id).await?;

        let written = ctx
            .bounded(
                self.store
                    .upsert_attribute(person_id, &req.key, &req.value, &self.keys),
            )
            .await
            .map_err(AttributeError::Create)?;

        self.record_audit(meta, &req.key, &req.value);

        let attribute = ctx
            .bounded(self.store.get_attribute(person_id, &req.key, &self.keys))
            .await
            .map_err(AttributeError::Retrieve)?;

        info!(
            %person_id,
            attribute_id = written.id,
            version = written.version,
            key_version = written.key_version,
            "Attribute upserted"
        );
        Ok(attribute)
    }

    /// All attributes of a person, ordered by id.
    pub async fn list(
        &self,
        ctx: &RequestContext,
        person_id: Uuid,
    ) -> Result<Vec<Attribute>, AttributeError> {
        self.ensure_person(ctx, person_id).await?;
        ctx.bounded(self.store.list_attributes(person_id, &self.keys))
            .await
            .map_err(AttributeError::RetrieveAttributes)
    }

    pub async fn get(
        &self,
        ctx: &RequestContext,
        person_id: Uuid,
        attribute_id: i64,
    ) -> Result<Attribute, AttributeError> {
        self.ensure_person(ctx, person_id).await?;
        self.find_by_id(ctx, person_id, attribute_id).await
    }

    /// Rename, version-checked update or blind update, depending on the body.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        person_id: Uuid,
        attribute_id: i64,
        req: UpdateAttributeRequest,
    ) -> Result<Attribute, AttributeError> {
        if req.value.trim().is_empty() {
            return Err(AttributeError::ValueRequired);
        }

        self.ensure_person_for_write(ctx, person_id).await?;
        let existing = self.find_by_id(ctx, person_id, attribute_id).await?;

        let renamed_to = req
            .key
            .as_deref()
            .filter(|k| !k.is_empty() && *k != existing.key);
        let effective_key = renamed_to.unwrap_or(&existing.key).to_string();

        let written = if let Some(new_key) = renamed_to {
            ctx.bounded(self.store.delete_attribute(person_id, &existing.key))
                .await
                .map_err(AttributeError::UpdateKey)?;
            let meta = ctx
                .bounded(
                    self.store
                        .upsert_attribute(person_id, new_key, &req.value, &self.keys),
                )
                .await
                .map_err(AttributeError::Update)?;
            info!(
                %person_id,
                old_attribute_id = existing.id,
                attribute_id = meta.id,
                "Attribute renamed"
            );
            meta
        } else if let Some(expected) = req.version {
            ctx.bounded(self.store.update_attribute_if_version(
                person_id,
                &effective_key,
                &req.value,
                &self.keys,
                expected,
            ))
            .await
            .map_err(AttributeError::Update)?
            .ok_or(AttributeError::VersionConflict)?
        } else {
            ctx.bounded(
                self.store
                    .upsert_attribute(person_id, &effective_key, &req.value, &self.keys),
            )
            .await
            .map_err(AttributeError::Update)?
        };

        if let Some(meta) = &req.meta {
            self.record_audit(meta, &effective_key, &req.value);
        }

        let attribute = ctx
            .bounded(self.store.get_attribute(person_id, &effective_key, &self.keys))
            .await
            .map_err(AttributeError::RetrieveUpdated)?;

        info!(
            %person_id,
            attribute_id = written.id,
            version = written.version,
            "Attribute updated"
        );
        Ok(attribute)
    }

    pub async fn delete(
        &self,
        ctx: &RequestContext,
        person_id: Uuid,
        attribute_id: i64,
    ) -> Result<(), AttributeError> {
        self.ensure_person_for_write(ctx, person_id).await?;
        let existing = self.find_by_id(ctx, person_id, attribute_id).await?;

        match ctx
            .bounded(self.store.delete_attribute(person_id, &existing.key))
            .await
        {
            Ok(()) => {
                info!(%person_id, attribute_id, "Attribute deleted");
                Ok(())
            }
            // removed by a concurrent request since the lookup
            Err(StoreError::NotFound) => Err(AttributeError::AttributeNotFound),
            Err(e) => Err(AttributeError::Delete(e)),
        }
    }

    async fn ensure_person(
        &self,
        ctx: &RequestContext,
        person_id: Uuid,
    ) -> Result<(), AttributeError> {
        match ctx.bounded(self.store.get_person(person_id)).await {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound) => Err(AttributeError::PersonNotFound),
            Err(e) => Err(AttributeError::VerifyPerson(e)),
        }
    }

    /// Update and delete report an unknown person with the terse message.
    async fn ensure_person_for_write(
        &self,
        ctx: &RequestContext,
        person_id: Uuid,
    ) -> Result<(), AttributeError> {
        self.ensure_person(ctx, person_id)
            .await
            .map_err(|e| match e {
                AttributeError::PersonNotFound => AttributeError::PersonMissing,
                other => other,
            })
    }

    async fn find_by_id(
        &self,
        ctx: &RequestContext,
        person_id: Uuid,
        attribute_id: i64,
    ) -> Result<Attribute, AttributeError> {
        let attributes = ctx
            .bounded(self.store.list_attributes(person_id, &self.keys))
            .await
            .map_err(AttributeError::RetrieveAttributes)?;
        attributes
            .into_iter()
            .find(|a| a.id == attribute_id)
            .ok_or(AttributeError::AttributeNotFound)
    }

    fn record_audit(&self, meta: &Meta, key: &str, value: &str) {
        let Some(trace_id) = meta.audit_trace_id() else {
            return;
        };
        self.audit.record(NewAuditEntry {
            trace_id: trace_id.to_string(),
            caller: meta.caller.clone(),
            reason: meta.reason.clone(),
            request_body: request_payload(key, value),
            response_body: String::new(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptionKey;
    use crate::storage::memory::{MemoryStore, StoreOp};
    use std::time::Duration;
    use tokio::time::Instant;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: AttributeService,
        person: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let person = Uuid::new_v4();
        store.insert_person(person).await;
        let keys = Arc::new(KeyRing::single(EncryptionKey::new("service-test")));
        let audit = AuditWriter::new(store.clone(), keys.clone());
        let service = AttributeService::new(store.clone(), keys, audit);
        Fixture {
            store,
            service,
            person,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new("test-trace", Instant::now() + Duration::from_secs(5))
    }

    fn meta(trace_id: Option<&str>) -> Option<Meta> {
        Some(Meta {
            caller: "tester".into(),
            reason: "unit".into(),
            trace_id: trace_id.map(String::from),
        })
    }

    fn upsert_req(key: &str, value: &str, trace_id: Option<&str>) -> UpsertAttributeRequest {
        UpsertAttributeRequest {
            key: key.into(),
            value: value.into(),
            meta: meta(trace_id),
        }
    }

    fn update_req(key: Option<&str>, value: &str, version: Option<i64>) -> UpdateAttributeRequest {
        UpdateAttributeRequest {
            key: key.map(String::from),
            value: value.into(),
            version,
            meta: None,
        }
    }

    #[test]
    fn id_parsing() {
        assert!(matches!(
            parse_collection_person_id("nope"),
            Err(AttributeError::UnknownPersonId)
        ));
        assert!(matches!(
            parse_person_id("nope"),
            Err(AttributeError::InvalidPersonId)
        ));
        assert!(matches!(
            parse_attribute_id("1.5"),
            Err(AttributeError::InvalidAttributeId)
        ));
        assert_eq!(parse_attribute_id("42").unwrap(), 42);
    }

    #[test]
    fn malformed_collection_person_id_maps_to_404() {
        let err: ApiError = AttributeError::UnknownPersonId.into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "Person not found");
        assert_eq!(err.code, ErrorCode::InvalidPersonId);
    }

    #[tokio::test]
    async fn upsert_twice_keeps_id_and_bumps_version() {
        let f = fixture().await;
        let first = f
            .service
            .upsert(&ctx(), f.person, upsert_req("email", "a@b", None))
            .await
            .unwrap();
        let second = f
            .service
            .upsert(&ctx(), f.person, upsert_req("email", "a@c", None))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(second.value, "a@c");
    }

    #[tokio::test]
    async fn upsert_validates_before_touching_storage() {
        let f = fixture().await;
        let err = f
            .service
            .upsert(&ctx(), f.person, upsert_req("  ", "v", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AttributeError::KeyRequired));

        let mut req = upsert_req("k", "v", None);
        req.meta = None;
        let err = f.service.upsert(&ctx(), f.person, req).await.unwrap_err();
        assert!(matches!(err, AttributeError::MissingMeta));

        let mut req = upsert_req("k", "v", None);
        req.meta = Some(Meta::default());
        let err = f.service.upsert(&ctx(), f.person, req).await.unwrap_err();
        assert!(matches!(err, AttributeError::MetaFieldsRequired));

        assert_eq!(f.store.attribute_count().await, 0);
    }

    #[tokio::test]
    async fn upsert_unknown_person_is_404() {
        let f = fixture().await;
        let err = f
            .service
            .upsert(&ctx(), Uuid::new_v4(), upsert_req("k", "v", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AttributeError::PersonNotFound));
    }

    #[tokio::test]
    async fn audit_written_only_with_trace_id() {
        let f = fixture().await;
        f.service
            .upsert(&ctx(), f.person, upsert_req("a", "1", Some("")))
            .await
            .unwrap();
        f.service
            .upsert(&ctx(), f.person, upsert_req("b", "2", None))
            .await
            .unwrap();
        f.service.audit().settle().await;
        assert_eq!(f.store.audit_count().await, 0);

        f.service
            .upsert(&ctx(), f.person, upsert_req("c", "3", Some("T9")))
            .await
            .unwrap();
        f.service.audit().settle().await;
        let entries = f.store.audit_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].trace_id, "T9");
        assert_eq!(entries[0].caller, "tester");
    }

    #[tokio::test]
    async fn audit_failure_does_not_fail_upsert() {
        let f = fixture().await;
        f.store
            .fail_on(StoreOp::InsertAuditLog, StoreError::Transient("down".into()))
            .await;
        let attribute = f
            .service
            .upsert(&ctx(), f.person, upsert_req("k", "v", Some("T1")))
            .await
            .unwrap();
        assert_eq!(attribute.version, 1);
        f.service.audit().settle().await;
        assert_eq!(f.service.audit().failure_count(), 1);
    }

    #[tokio::test]
    async fn version_checked_update_conflicts_on_stale_version() {
        let f = fixture().await;
        let created = f
            .service
            .upsert(&ctx(), f.person, upsert_req("email", "a@b", None))
            .await
            .unwrap();

        let updated = f
            .service
            .update(&ctx(), f.person, created.id, update_req(None, "a@c", Some(1)))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        let err = f
            .service
            .update(&ctx(), f.person, created.id, update_req(None, "a@d", Some(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AttributeError::VersionConflict));

        let current = f.service.get(&ctx(), f.person, created.id).await.unwrap();
        assert_eq!(current.value, "a@c");
        assert_eq!(current.version, 2);
    }

    #[tokio::test]
    async fn rename_recreates_with_version_one() {
        let f = fixture().await;
        let created = f
            .service
            .upsert(&ctx(), f.person, upsert_req("email", "a@b", None))
            .await
            .unwrap();
        f.service
            .upsert(&ctx(), f.person, upsert_req("email", "a@c", None))
            .await
            .unwrap();

        let renamed = f
            .service
            .update(&ctx(), f.person, created.id, update_req(Some("mail"), "a@c", None))
            .await
            .unwrap();
        assert_eq!(renamed.key, "mail");
        assert_eq!(renamed.version, 1);
        assert_ne!(renamed.id, created.id);

        let all = f.service.list(&ctx(), f.person).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "mail");
    }

    #[tokio::test]
    async fn same_key_in_body_is_a_plain_update() {
        let f = fixture().await;
        let created = f
            .service
            .upsert(&ctx(), f.person, upsert_req("email", "a@b", None))
            .await
            .unwrap();
        let updated = f
            .service
            .update(&ctx(), f.person, created.id, update_req(Some("email"), "x", None))
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn update_requires_value() {
        let f = fixture().await;
        let err = f
            .service
            .update(&ctx(), f.person, 1, update_req(None, "   ", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AttributeError::ValueRequired));
    }

    #[tokio::test]
    async fn update_with_trace_id_is_audited() {
        let f = fixture().await;
        let created = f
            .service
            .upsert(&ctx(), f.person, upsert_req("k", "v", None))
            .await
            .unwrap();
        let mut req = update_req(None, "w", None);
        req.meta = meta(Some("T2"));
        f.service
            .update(&ctx(), f.person, created.id, req)
            .await
            .unwrap();
        f.service.audit().settle().await;
        assert_eq!(f.store.audit_count().await, 1);
    }

    #[tokio::test]
    async fn delete_then_stale_delete_is_not_found() {
        let f = fixture().await;
        let created = f
            .service
            .upsert(&ctx(), f.person, upsert_req("k", "v", None))
            .await
            .unwrap();
        f.service.delete(&ctx(), f.person, created.id).await.unwrap();
        let err = f
            .service
            .delete(&ctx(), f.person, created.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AttributeError::AttributeNotFound));
    }

    #[tokio::test]
    async fn storage_failures_map_to_operation_errors() {
        let f = fixture().await;
        f.store
            .fail_on(StoreOp::GetPerson, StoreError::Transient("down".into()))
            .await;
        let err = f.service.list(&ctx(), f.person).await.unwrap_err();
        assert!(matches!(err, AttributeError::VerifyPerson(_)));
        f.store.clear_failures().await;

        f.store
            .fail_on(StoreOp::UpsertAttribute, StoreError::Internal("x".into()))
            .await;
        let err = f
            .service
            .upsert(&ctx(), f.person, upsert_req("k", "v", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AttributeError::Create(_)));
        let api: ApiError = err.into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message, "Failed to create attribute");
    }

    fn assert_api_error(err: AttributeError, status: StatusCode, code: ErrorCode, message: &str) {
        let api: ApiError = err.into();
        assert_eq!(api.status, status);
        assert_eq!(api.code, code);
        assert_eq!(api.message, message);
    }

    #[tokio::test]
    async fn unknown_person_on_update_and_delete_is_terse_404() {
        let f = fixture().await;
        let stranger = Uuid::new_v4();

        let err = f
            .service
            .update(&ctx(), stranger, 1, update_req(None, "v", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AttributeError::PersonMissing));
        assert_api_error(err, StatusCode::NOT_FOUND, ErrorCode::PersonNotFound, "Not found");

        let err = f.service.delete(&ctx(), stranger, 1).await.unwrap_err();
        assert_api_error(err, StatusCode::NOT_FOUND, ErrorCode::PersonNotFound, "Not found");

        let err = f.service.get(&ctx(), stranger, 1).await.unwrap_err();
        assert_api_error(
            err,
            StatusCode::NOT_FOUND,
            ErrorCode::PersonNotFound,
            "Person not found",
        );
    }

    #[tokio::test]
    async fn upsert_read_back_failure_is_retrieve_error() {
        let f = fixture().await;
        f.store
            .fail_on(StoreOp::GetAttribute, StoreError::Internal("x".into()))
            .await;
        let err = f
            .service
            .upsert(&ctx(), f.person, upsert_req("k", "v", None))
            .await
            .unwrap_err();
        assert_api_error(
            err,
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::RetrieveFailed,
            "Failed to retrieve attribute",
        );
    }

    #[tokio::test]
    async fn rename_delete_failure_is_update_key_error() {
        let f = fixture().await;
        let created = f
            .service
            .upsert(&ctx(), f.person, upsert_req("email", "a@b", None))
            .await
            .unwrap();
        f.store
            .fail_on(StoreOp::DeleteAttribute, StoreError::Internal("x".into()))
            .await;
        let err = f
            .service
            .update(&ctx(), f.person, created.id, update_req(Some("mail"), "a@b", None))
            .await
            .unwrap_err();
        assert_api_error(
            err,
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::UpdateFailed,
            "Failed to update attribute key",
        );
    }

    #[tokio::test]
    async fn write_failures_during_update_are_update_errors() {
        let f = fixture().await;
        let created = f
            .service
            .upsert(&ctx(), f.person, upsert_req("email", "a@b", None))
            .await
            .unwrap();

        f.store
            .fail_on(
                StoreOp::UpdateAttribute,
                StoreError::Transient("down".into()),
            )
            .await;
        let err = f
            .service
            .update(&ctx(), f.person, created.id, update_req(None, "x", Some(1)))
            .await
            .unwrap_err();
        assert_api_error(
            err,
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::UpdateFailed,
            "Failed to update attribute",
        );
        f.store.clear_failures().await;

        f.store
            .fail_on(StoreOp::UpsertAttribute, StoreError::Internal("x".into()))
            .await;
        let err = f
            .service
            .update(&ctx(), f.person, created.id, update_req(None, "x", None))
            .await
            .unwrap_err();
        assert_api_error(
            err,
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::UpdateFailed,
            "Failed to update attribute",
        );
    }

    #[tokio::test]
    async fn update_read_back_failure_is_retrieve_updated_error() {
        let f = fixture().await;
        let created = f
            .service
            .upsert(&ctx(), f.person, upsert_req("email", "a@b", None))
            .await
            .unwrap();
        f.store
            .fail_on(StoreOp::GetAttribute, StoreError::Internal("x".into()))
            .await;
        let err = f
            .service
            .update(&ctx(), f.person, created.id, update_req(None, "x", None))
            .await
            .unwrap_err();
        assert_api_error(
            err,
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::RetrieveFailed,
            "Failed to retrieve updated attribute",
        );
        f.store.clear_failures().await;

        // the write itself went through
        let current = f.service.get(&ctx(), f.person, created.id).await.unwrap();
        assert_eq!(current.value, "x");
        assert_eq!(current.version, 2);
    }

    #[tokio::test]
    async fn delete_failure_is_delete_error() {
        let f = fixture().await;
        let created = f
            .service
            .upsert(&ctx(), f.person, upsert_req("k", "v", None))
            .await
            .unwrap();
        f.store
            .fail_on(StoreOp::DeleteAttribute, StoreError::Transient("down".into()))
            .await;
        let err = f
            .service
            .delete(&ctx(), f.person, created.id)
            .await
            .unwrap_err();
        assert_api_error(
            err,
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::DeleteFailed,
            "Failed to delete attribute",
        );
    }

    #[tokio::test]
    async fn list_failure_during_lookup_is_retrieve_failed() {
        let f = fixture().await;
        let created = f
            .service
            .upsert(&ctx(), f.person, upsert_req("k", "v", None))
            .await
            .unwrap();
        f.store
            .fail_on(StoreOp::ListAttributes, StoreError::Internal("x".into()))
            .await;

        let errors = vec![
            f.service
                .get(&ctx(), f.person, created.id)
                .await
                .unwrap_err(),
            f.service
                .update(&ctx(), f.person, created.id, update_req(None, "x", None))
                .await
                .unwrap_err(),
            f.service
                .delete(&ctx(), f.person, created.id)
                .await
                .unwrap_err(),
        ];
        for err in errors {
            assert_api_error(
                err,
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::RetrieveFailed,
                "Failed to retrieve attributes",
            );
        }
    }
}
