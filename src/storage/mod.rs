// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Gateway
//!
//! The [`Store`] trait is the only way the service touches persisted state.
//! Two implementations exist:
//!
//! - [`PgStore`] - Postgres through a `sqlx` pool. Attribute and audit
//!   payloads are encrypted and decrypted inside the SQL statements with
//!   pgcrypto, so plaintext only crosses the wire as a bound parameter.
//! - [`MemoryStore`] - process-local tables used by the test suite. Values
//!   are sealed with the same [`KeyRing`] before they are kept.
//!
//! ## Tables
//!
//! ```text
//! person              external identities (read-only here)
//! person_attributes   (person_id, attribute_key) unique, encrypted value,
//!                     key_version, version >= 1
//! request_log         append-only audit rows, indexed by trace_id
//! key_value           flat public store
//! ```
//!
//! Every failure is one of the [`StoreError`] kinds.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::crypto::{CryptoError, KeyRing, KeyVersion};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Error kinds surfaced by any gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    Transient(String),

    #[error("decryption failed: {0}")]
    Crypto(String),

    #[error("storage error: {0}")]
    Internal(String),
}

impl From<CryptoError> for StoreError {
    fn from(e: CryptoError) -> Self {
        StoreError::Crypto(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// An externally managed identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub id: Uuid,
    pub created_at: Option<DateTime<Utc>>,
}

/// Attribute row without its value, as returned by writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMeta {
    pub id: i64,
    pub key: String,
    pub key_version: KeyVersion,
    pub version: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Attribute row with its decrypted value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub id: i64,
    pub person_id: Uuid,
    pub key: String,
    pub value: String,
    pub key_version: KeyVersion,
    pub version: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Audit row to append. Bodies are plaintext here and encrypted by the
/// gateway under the current key version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub trace_id: String,
    pub caller: String,
    pub reason: String,
    pub request_body: String,
    pub response_body: String,
}

/// Identity of an appended audit row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditMeta {
    pub id: i64,
    pub trace_id: String,
    pub key_version: KeyVersion,
    pub created_at: Option<DateTime<Utc>>,
}

/// Flat key/value record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValueRecord {
    pub key: String,
    pub value: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Storage verbs consumed by the service layer.
///
/// Writes of the same `(person_id, key)` are serialised by the backing
/// store; [`Store::update_attribute_if_version`] is a single compare-and-swap.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_person(&self, person_id: Uuid) -> StoreResult<Person>;

    /// Insert with `version = 1`, or overwrite the value and bump `version`.
    async fn upsert_attribute(
        &self,
        person_id: Uuid,
        key: &str,
        value: &str,
        keys: &KeyRing,
    ) -> StoreResult<AttributeMeta>;

    /// Overwrite only if the stored version equals `expected_version`.
    /// `Ok(None)` means no row matched and nothing was written.
    async fn update_attribute_if_version(
        &self,
        person_id: Uuid,
        key: &str,
        value: &str,
        keys: &KeyRing,
        expected_version: i64,
    ) -> StoreResult<Option<AttributeMeta>>;

    async fn get_attribute(
        &self,
        person_id: Uuid,
        key: &str,
        keys: &KeyRing,
    ) -> StoreResult<Attribute>;

    /// All attributes of a person, ordered by `id` ascending.
    async fn list_attributes(&self, person_id: Uuid, keys: &KeyRing) -> StoreResult<Vec<Attribute>>;

    async fn delete_attribute(&self, person_id: Uuid, key: &str) -> StoreResult<()>;

    async fn insert_audit_log(&self, entry: &NewAuditEntry, keys: &KeyRing)
        -> StoreResult<AuditMeta>;

    async fn get_key_value(&self, key: &str) -> StoreResult<KeyValueRecord>;

    async fn set_key_value(&self, key: &str, value: &str) -> StoreResult<KeyValueRecord>;

    /// Returns whether a record was removed.
    async fn delete_key_value(&self, key: &str) -> StoreResult<bool>;

    async fn ping(&self) -> StoreResult<()>;
}
