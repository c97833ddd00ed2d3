// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Postgres gateway backed by `sqlx`.
//!
//! ## Encryption boundary
//!
//! Attribute values and audit payloads are encrypted with pgcrypto inside the
//! statements themselves. The key ring is bound as a `text[]` parameter and
//! decryption picks the key by each row's `key_version`:
//!
//! ```sql
//! pgp_sym_decrypt(encrypted_value, ($3::text[])[key_version::int])
//! ```
//!
//! A version outside the ring yields a NULL key and therefore a NULL value,
//! reported as [`StoreError::Crypto`]; a wrong key raises
//! `Wrong key or corrupt data`, reported the same way.
//!
//! ## Pool
//!
//! One process-wide pool (25 max, 5 min, 5 min lifetime, 1 min idle). The
//! [`PoolMonitor`] pings it once a minute until shutdown.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    Attribute, AttributeMeta, AuditMeta, KeyValueRecord, NewAuditEntry, Person, Store,
    StoreError, StoreResult,
};
use crate::crypto::KeyRing;

pub const MAX_CONNECTIONS: u32 = 25;
pub const MIN_CONNECTIONS: u32 = 5;
pub const MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// pgcrypto raises this SQLSTATE for a wrong key or corrupt ciphertext.
const PGCRYPTO_FAILURE: &str = "39000";
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
                let message = db.message().to_string();
                if code == UNIQUE_VIOLATION {
                    StoreError::Conflict(message)
                } else if code == FOREIGN_KEY_VIOLATION {
                    StoreError::NotFound
                } else if code == PGCRYPTO_FAILURE || message.contains("Wrong key or corrupt data")
                {
                    StoreError::Crypto(message)
                } else {
                    StoreError::Internal(format!("{code}: {message}"))
                }
            }
            transient @ (sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed) => StoreError::Transient(transient.to_string()),
            other => StoreError::Internal(other.to_string()),
        }
    }
}

// =============================================================================
// Row shapes
// =============================================================================

#[derive(Debug, FromRow)]
struct PersonRow {
    id: Uuid,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct AttributeMetaRow {
    id: i64,
    attribute_key: String,
    key_version: i64,
    version: i64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<AttributeMetaRow> for AttributeMeta {
    fn from(row: AttributeMetaRow) -> Self {
        Self {
            id: row.id,
            key: row.attribute_key,
            key_version: row.key_version,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AttributeRow {
    id: i64,
    person_id: Uuid,
    attribute_key: String,
    attribute_value: Option<String>,
    key_version: i64,
    version: i64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<AttributeRow> for Attribute {
    type Error = StoreError;

    fn try_from(row: AttributeRow) -> Result<Self, Self::Error> {
        let value = row.attribute_value.ok_or_else(|| {
            StoreError::Crypto(format!("no key for key_version {}", row.key_version))
        })?;
        Ok(Self {
            id: row.id,
            person_id: row.person_id,
            key: row.attribute_key,
            value,
            key_version: row.key_version,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: i64,
    trace_id: String,
    key_version: i64,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct KeyValueRow {
    key: String,
    value: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<KeyValueRow> for KeyValueRecord {
    fn from(row: KeyValueRow) -> Self {
        Self {
            key: row.key,
            value: row.value,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Gateway over a Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Build the pool and verify connectivity within `ACQUIRE_TIMEOUT`.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Internal(format!("invalid database url: {e}")))?;

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .min_connections(MIN_CONNECTIONS)
            .max_lifetime(MAX_LIFETIME)
            .idle_timeout(IDLE_TIMEOUT)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .test_before_acquire(true)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ping().await?;
        Ok(store)
    }

    /// Apply the embedded migrations under `./migrations`.
    pub async fn migrate(&self) -> StoreResult<()> {
        info!("Starting database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(format!("migration failed: {e}")))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_person(&self, person_id: Uuid) -> StoreResult<Person> {
        let row = sqlx::query_as::<_, PersonRow>(
            "SELECT id, created_at FROM person WHERE id = $1",
        )
        .bind(person_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Person {
            id: row.id,
            created_at: row.created_at,
        })
    }

    async fn upsert_attribute(
        &self,
        person_id: Uuid,
        key: &str,
        value: &str,
        keys: &KeyRing,
    ) -> StoreResult<AttributeMeta> {
        let row = sqlx::query_as::<_, AttributeMetaRow>(
            r#"
            INSERT INTO person_attributes
                (person_id, attribute_key, encrypted_value, key_version, version, created_at, updated_at)
            VALUES ($1, $2, pgp_sym_encrypt($3, $4), $5, 1, NOW(), NOW())
            ON CONFLICT (person_id, attribute_key) DO UPDATE SET
                encrypted_value = EXCLUDED.encrypted_value,
                key_version = EXCLUDED.key_version,
                version = person_attributes.version + 1,
                updated_at = NOW()
            RETURNING id, attribute_key, key_version, version, created_at, updated_at
            "#,
        )
        .bind(person_id)
        .bind(key)
        .bind(value)
        .bind(keys.current().expose())
        .bind(keys.current_version())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn update_attribute_if_version(
        &self,
        person_id: Uuid,
        key: &str,
        value: &str,
        keys: &KeyRing,
        expected_version: i64,
    ) -> StoreResult<Option<AttributeMeta>> {
        let row = sqlx::query_as::<_, AttributeMetaRow>(
            r#"
            UPDATE person_attributes SET
                encrypted_value = pgp_sym_encrypt($3, $4),
                key_version = $5,
                version = version + 1,
                updated_at = NOW()
            WHERE person_id = $1
              AND attribute_key = $2
              AND version = $6
            RETURNING id, attribute_key, key_version, version, created_at, updated_at
            "#,
        )
        .bind(person_id)
        .bind(key)
        .bind(value)
        .bind(keys.current().expose())
        .bind(keys.current_version())
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_attribute(
        &self,
        person_id: Uuid,
        key: &str,
        keys: &KeyRing,
    ) -> StoreResult<Attribute> {
        let row = sqlx::query_as::<_, AttributeRow>(
            r#"
            SELECT id, person_id, attribute_key,
                   pgp_sym_decrypt(encrypted_value, ($3::text[])[key_version::int]) AS attribute_value,
                   key_version, version, created_at, updated_at
            FROM person_attributes
            WHERE person_id = $1 AND attribute_key = $2
            "#,
        )
        .bind(person_id)
        .bind(key)
        .bind(keys.secrets())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn list_attributes(&self, person_id: Uuid, keys: &KeyRing) -> StoreResult<Vec<Attribute>> {
        let rows = sqlx::query_as::<_, AttributeRow>(
            r#"
            SELECT id, person_id, attribute_key,
                   pgp_sym_decrypt(encrypted_value, ($2::text[])[key_version::int]) AS attribute_value,
                   key_version, version, created_at, updated_at
            FROM person_attributes
            WHERE person_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(person_id)
        .bind(keys.secrets())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Attribute::try_from).collect()
    }

    async fn delete_attribute(&self, person_id: Uuid, key: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "DELETE FROM person_attributes WHERE person_id = $1 AND attribute_key = $2",
        )
        .bind(person_id)
        .bind(key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_audit_log(
        &self,
        entry: &NewAuditEntry,
        keys: &KeyRing,
    ) -> StoreResult<AuditMeta> {
        let row = sqlx::query_as::<_, AuditRow>(
            r#"
            INSERT INTO request_log
                (trace_id, caller, reason, encrypted_request_body, encrypted_response_body, key_version, created_at)
            VALUES ($1, $2, $3, pgp_sym_encrypt($4, $6), pgp_sym_encrypt($5, $6), $7, NOW())
            RETURNING id, trace_id, key_version, created_at
            "#,
        )
        .bind(&entry.trace_id)
        .bind(&entry.caller)
        .bind(&entry.reason)
        .bind(&entry.request_body)
        .bind(&entry.response_body)
        .bind(keys.current().expose())
        .bind(keys.current_version())
        .fetch_one(&self.pool)
        .await?;

        Ok(AuditMeta {
            id: row.id,
            trace_id: row.trace_id,
            key_version: row.key_version,
            created_at: row.created_at,
        })
    }

    async fn get_key_value(&self, key: &str) -> StoreResult<KeyValueRecord> {
        let row = sqlx::query_as::<_, KeyValueRow>(
            "SELECT key, value, created_at, updated_at FROM key_value WHERE key = $1",
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn set_key_value(&self, key: &str, value: &str) -> StoreResult<KeyValueRecord> {
        let row = sqlx::query_as::<_, KeyValueRow>(
            r#"
            INSERT INTO key_value (key, value, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = NOW()
            RETURNING key, value, created_at, updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn delete_key_value(&self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM key_value WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// =============================================================================
// Pool monitor
// =============================================================================

/// Background task that pings the pool on a fixed interval.
pub struct PoolMonitor {
    store: PgStore,
    interval: Duration,
}

impl PoolMonitor {
    pub fn new(store: PgStore) -> Self {
        Self {
            store,
            interval: HEALTH_CHECK_INTERVAL,
        }
    }

    /// Run until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(monitor.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Database pool monitor starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Database pool monitor shutting down");
                    return;
                }
            }

            match self.store.ping().await {
                Ok(()) => debug!(
                    size = self.store.pool.size(),
                    idle = self.store.pool.num_idle(),
                    "Database pool healthy"
                ),
                Err(e) => warn!(error = %e, "Database pool health check failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptionKey;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;

    #[derive(Debug)]
    struct PgFailure {
        code: &'static str,
        message: &'static str,
    }

    impl std::fmt::Display for PgFailure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.message)
        }
    }

    impl StdError for PgFailure {}

    impl DatabaseError for PgFailure {
        fn message(&self) -> &str {
            self.message
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            if self.code == UNIQUE_VIOLATION {
                ErrorKind::UniqueViolation
            } else if self.code == FOREIGN_KEY_VIOLATION {
                ErrorKind::ForeignKeyViolation
            } else {
                ErrorKind::Other
            }
        }
    }

    fn db_error(code: &'static str, message: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(PgFailure { code, message }))
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert_eq!(StoreError::from(sqlx::Error::RowNotFound), StoreError::NotFound);
    }

    #[test]
    fn pool_and_io_failures_are_transient() {
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Transient(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolClosed),
            StoreError::Transient(_)
        ));
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            StoreError::from(sqlx::Error::Io(io)),
            StoreError::Transient(_)
        ));
    }

    #[test]
    fn database_errors_map_by_sqlstate() {
        assert_eq!(
            StoreError::from(db_error(UNIQUE_VIOLATION, "duplicate key")),
            StoreError::Conflict("duplicate key".into())
        );
        assert_eq!(
            StoreError::from(db_error(FOREIGN_KEY_VIOLATION, "violates foreign key")),
            StoreError::NotFound
        );
        assert_eq!(
            StoreError::from(db_error(PGCRYPTO_FAILURE, "Wrong key or corrupt data")),
            StoreError::Crypto("Wrong key or corrupt data".into())
        );
        assert_eq!(
            StoreError::from(db_error("XX000", "Wrong key or corrupt data")),
            StoreError::Crypto("Wrong key or corrupt data".into())
        );
        assert_eq!(
            StoreError::from(db_error("42P01", "relation does not exist")),
            StoreError::Internal("42P01: relation does not exist".into())
        );
    }

    #[test]
    fn null_decrypted_value_is_a_crypto_error() {
        let row = AttributeRow {
            id: 1,
            person_id: Uuid::new_v4(),
            attribute_key: "email".into(),
            attribute_value: None,
            key_version: 3,
            version: 1,
            created_at: None,
            updated_at: None,
        };
        let err = Attribute::try_from(row).unwrap_err();
        assert!(matches!(err, StoreError::Crypto(_)));
    }

    // -------------------------------------------------------------------------
    // Live database tests. They run only when DATABASE_URL is set.
    // -------------------------------------------------------------------------

    async fn live_store() -> Option<PgStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let store = PgStore::connect(&url)
            .await
            .expect("connect to DATABASE_URL");
        store.migrate().await.expect("run migrations");
        Some(store)
    }

    async fn insert_person(store: &PgStore) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO person (id) VALUES ($1)")
            .bind(id)
            .execute(&store.pool)
            .await
            .unwrap();
        id
    }

    fn ring(secrets: &[&str]) -> KeyRing {
        KeyRing::new(secrets.iter().map(|s| EncryptionKey::new(*s)).collect()).unwrap()
    }

    #[tokio::test]
    async fn upsert_bumps_version_and_keeps_id() {
        let Some(store) = live_store().await else {
            return;
        };
        let person = insert_person(&store).await;
        let keys = ring(&["pg-test-key-1"]);

        let first = store
            .upsert_attribute(person, "email", "a@b", &keys)
            .await
            .unwrap();
        let second = store
            .upsert_attribute(person, "email", "a@c", &keys)
            .await
            .unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(second.id, first.id);

        let read = store.get_attribute(person, "email", &keys).await.unwrap();
        assert_eq!(read.value, "a@c");
        assert_eq!(read.version, 2);
    }

    #[tokio::test]
    async fn stale_version_update_matches_no_row() {
        let Some(store) = live_store().await else {
            return;
        };
        let person = insert_person(&store).await;
        let keys = ring(&["pg-test-key-1"]);
        store
            .upsert_attribute(person, "email", "a@b", &keys)
            .await
            .unwrap();

        let updated = store
            .update_attribute_if_version(person, "email", "a@c", &keys, 1)
            .await
            .unwrap()
            .expect("current version matches");
        assert_eq!(updated.version, 2);

        let stale = store
            .update_attribute_if_version(person, "email", "a@d", &keys, 1)
            .await
            .unwrap();
        assert!(stale.is_none());

        let read = store.get_attribute(person, "email", &keys).await.unwrap();
        assert_eq!(read.value, "a@c");
        assert_eq!(read.version, 2);
    }

    #[tokio::test]
    async fn list_is_ordered_by_id() {
        let Some(store) = live_store().await else {
            return;
        };
        let person = insert_person(&store).await;
        let keys = ring(&["pg-test-key-1"]);
        for key in ["b", "a", "c"] {
            store.upsert_attribute(person, key, key, &keys).await.unwrap();
        }

        let listed = store.list_attributes(person, &keys).await.unwrap();
        let order: Vec<&str> = listed.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(order, ["b", "a", "c"]);
        assert!(listed.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn rows_under_an_older_key_stay_readable() {
        let Some(store) = live_store().await else {
            return;
        };
        let person = insert_person(&store).await;
        let old_ring = ring(&["pg-rotation-1"]);
        let new_ring = ring(&["pg-rotation-1", "pg-rotation-2"]);

        store
            .upsert_attribute(person, "old", "first", &old_ring)
            .await
            .unwrap();
        let written = store
            .upsert_attribute(person, "new", "second", &new_ring)
            .await
            .unwrap();
        assert_eq!(written.key_version, 2);

        let listed = store.list_attributes(person, &new_ring).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!((listed[0].value.as_str(), listed[0].key_version), ("first", 1));
        assert_eq!((listed[1].value.as_str(), listed[1].key_version), ("second", 2));

        let err = store
            .get_attribute(person, "new", &old_ring)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Crypto(_)));
    }

    #[tokio::test]
    async fn unknown_person_and_missing_rows_are_not_found() {
        let Some(store) = live_store().await else {
            return;
        };
        let keys = ring(&["pg-test-key-1"]);
        let stranger = Uuid::new_v4();

        assert_eq!(
            store.get_person(stranger).await.unwrap_err(),
            StoreError::NotFound
        );
        assert_eq!(
            store
                .upsert_attribute(stranger, "k", "v", &keys)
                .await
                .unwrap_err(),
            StoreError::NotFound
        );

        let person = insert_person(&store).await;
        assert_eq!(
            store.delete_attribute(person, "absent").await.unwrap_err(),
            StoreError::NotFound
        );
    }
}
