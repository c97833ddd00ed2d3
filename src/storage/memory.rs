// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory gateway.
//!
//! Mirrors the Postgres tables closely enough for the service and HTTP
//! layers to be exercised without a database: a unique `(person_id, key)`
//! index, `BIGSERIAL`-style ids, version bumps on overwrite and values
//! sealed with the key ring. All tables live behind one lock so every verb
//! is atomic, like a single SQL statement.
//!
//! Tests can seed persons, inspect the audit log and force a verb to fail.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Attribute, AttributeMeta, AuditMeta, KeyValueRecord, NewAuditEntry, Person, Store,
    StoreError, StoreResult,
};
use crate::crypto::{KeyRing, KeyVersion};

/// Gateway verbs that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetPerson,
    UpsertAttribute,
    UpdateAttribute,
    GetAttribute,
    ListAttributes,
    DeleteAttribute,
    InsertAuditLog,
    GetKeyValue,
    SetKeyValue,
    DeleteKeyValue,
    Ping,
}

#[derive(Debug, Clone)]
struct StoredAttribute {
    id: i64,
    person_id: Uuid,
    key: String,
    sealed: Vec<u8>,
    key_version: KeyVersion,
    version: i64,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl StoredAttribute {
    fn meta(&self) -> AttributeMeta {
        AttributeMeta {
            id: self.id,
            key: self.key.clone(),
            key_version: self.key_version,
            version: self.version,
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        }
    }

    fn open(&self, keys: &KeyRing) -> StoreResult<Attribute> {
        Ok(Attribute {
            id: self.id,
            person_id: self.person_id,
            key: self.key.clone(),
            value: keys.open(&self.sealed, self.key_version)?,
            key_version: self.key_version,
            version: self.version,
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        })
    }
}

/// Audit row as kept in memory; bodies stay sealed.
#[derive(Debug, Clone)]
pub struct StoredAuditEntry {
    pub id: i64,
    pub trace_id: String,
    pub caller: String,
    pub reason: String,
    pub sealed_request_body: Vec<u8>,
    pub sealed_response_body: Vec<u8>,
    pub key_version: KeyVersion,
}

#[derive(Default)]
struct Tables {
    persons: HashSet<Uuid>,
    /// Keyed by id so iteration follows insertion order.
    attributes: BTreeMap<i64, StoredAttribute>,
    next_attribute_id: i64,
    audit_log: Vec<StoredAuditEntry>,
    key_values: HashMap<String, KeyValueRecord>,
    failures: HashMap<StoreOp, StoreError>,
}

impl Tables {
    fn check(&self, op: StoreOp) -> StoreResult<()> {
        match self.failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn find_attribute(&self, person_id: Uuid, key: &str) -> Option<i64> {
        self.attributes
            .values()
            .find(|a| a.person_id == person_id && a.key == key)
            .map(|a| a.id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identity, as the external owner of `person` would.
    pub async fn insert_person(&self, person_id: Uuid) {
        self.tables.write().await.persons.insert(person_id);
    }

    /// Make every later call of `op` fail with `error`.
    pub async fn fail_on(&self, op: StoreOp, error: StoreError) {
        self.tables.write().await.failures.insert(op, error);
    }

    pub async fn clear_failures(&self) {
        self.tables.write().await.failures.clear();
    }

    pub async fn audit_entries(&self) -> Vec<StoredAuditEntry> {
        self.tables.read().await.audit_log.clone()
    }

    pub async fn audit_count(&self) -> usize {
        self.tables.read().await.audit_log.len()
    }

    pub async fn attribute_count(&self) -> usize {
        self.tables.read().await.attributes.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_person(&self, person_id: Uuid) -> StoreResult<Person> {
        let tables = self.tables.read().await;
        tables.check(StoreOp::GetPerson)?;
        if !tables.persons.contains(&person_id) {
            return Err(StoreError::NotFound);
        }
        Ok(Person {
            id: person_id,
            created_at: None,
        })
    }

    async fn upsert_attribute(
        &self,
        person_id: Uuid,
        key: &str,
        value: &str,
        keys: &KeyRing,
    ) -> StoreResult<AttributeMeta> {
        let mut tables = self.tables.write().await;
        tables.check(StoreOp::UpsertAttribute)?;
        if !tables.persons.contains(&person_id) {
            // foreign key to person
            return Err(StoreError::NotFound);
        }

        let (sealed, key_version) = keys.seal(value)?;
        let now = Utc::now();

        if let Some(id) = tables.find_attribute(person_id, key) {
            let stored = tables
                .attributes
                .get_mut(&id)
                .ok_or_else(|| StoreError::Internal("attribute index out of sync".to_string()))?;
            stored.sealed = sealed;
            stored.key_version = key_version;
            stored.version += 1;
            stored.updated_at = now;
            return Ok(stored.meta());
        }

        tables.next_attribute_id += 1;
        let stored = StoredAttribute {
            id: tables.next_attribute_id,
            person_id,
            key: key.to_string(),
            sealed,
            key_version,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let meta = stored.meta();
        tables.attributes.insert(stored.id, stored);
        Ok(meta)
    }

    async fn update_attribute_if_version(
        &self,
        person_id: Uuid,
        key: &str,
        value: &str,
        keys: &KeyRing,
        expected_version: i64,
    ) -> StoreResult<Option<AttributeMeta>> {
        let mut tables = self.tables.write().await;
        tables.check(StoreOp::UpdateAttribute)?;

        let Some(id) = tables.find_attribute(person_id, key) else {
            return Ok(None);
        };
        let Some(stored) = tables.attributes.get_mut(&id) else {
            return Ok(None);
        };
        if stored.version != expected_version {
            return Ok(None);
        }

        let (sealed, key_version) = keys.seal(value)?;
        stored.sealed = sealed;
        stored.key_version = key_version;
        stored.version += 1;
        stored.updated_at = Utc::now();
        Ok(Some(stored.meta()))
    }

    async fn get_attribute(
        &self,
        person_id: Uuid,
        key: &str,
        keys: &KeyRing,
    ) -> StoreResult<Attribute> {
        let tables = self.tables.read().await;
        tables.check(StoreOp::GetAttribute)?;
        let id = tables
            .find_attribute(person_id, key)
            .ok_or(StoreError::NotFound)?;
        tables
            .attributes
            .get(&id)
            .ok_or(StoreError::NotFound)?
            .open(keys)
    }

    async fn list_attributes(&self, person_id: Uuid, keys: &KeyRing) -> StoreResult<Vec<Attribute>> {
        let tables = self.tables.read().await;
        tables.check(StoreOp::ListAttributes)?;
        tables
            .attributes
            .values()
            .filter(|a| a.person_id == person_id)
            .map(|a| a.open(keys))
            .collect()
    }

    async fn delete_attribute(&self, person_id: Uuid, key: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.check(StoreOp::DeleteAttribute)?;
        let id = tables
            .find_attribute(person_id, key)
            .ok_or(StoreError::NotFound)?;
        tables.attributes.remove(&id);
        Ok(())
    }

    async fn insert_audit_log(
        &self,
        entry: &NewAuditEntry,
        keys: &KeyRing,
    ) -> StoreResult<AuditMeta> {
        let mut tables = self.tables.write().await;
        tables.check(StoreOp::InsertAuditLog)?;

        let (sealed_request_body, key_version) = keys.seal(&entry.request_body)?;
        let (sealed_response_body, _) = keys.seal(&entry.response_body)?;
        let id = tables.audit_log.len() as i64 + 1;

        tables.audit_log.push(StoredAuditEntry {
            id,
            trace_id: entry.trace_id.clone(),
            caller: entry.caller.clone(),
            reason: entry.reason.clone(),
            sealed_request_body,
            sealed_response_body,
            key_version,
        });

        Ok(AuditMeta {
            id,
            trace_id: entry.trace_id.clone(),
            key_version,
            created_at: Some(Utc::now()),
        })
    }

    async fn get_key_value(&self, key: &str) -> StoreResult<KeyValueRecord> {
        let tables = self.tables.read().await;
        tables.check(StoreOp::GetKeyValue)?;
        tables.key_values.get(key).cloned().ok_or(StoreError::NotFound)
    }

    async fn set_key_value(&self, key: &str, value: &str) -> StoreResult<KeyValueRecord> {
        let mut tables = self.tables.write().await;
        tables.check(StoreOp::SetKeyValue)?;
        let now = Utc::now();
        let record = tables
            .key_values
            .entry(key.to_string())
            .and_modify(|r| {
                r.value = value.to_string();
                r.updated_at = Some(now);
            })
            .or_insert_with(|| KeyValueRecord {
                key: key.to_string(),
                value: value.to_string(),
                created_at: Some(now),
                updated_at: Some(now),
            });
        Ok(record.clone())
    }

    async fn delete_key_value(&self, key: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        tables.check(StoreOp::DeleteKeyValue)?;
        Ok(tables.key_values.remove(key).is_some())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.tables.read().await.check(StoreOp::Ping)
    }
}
