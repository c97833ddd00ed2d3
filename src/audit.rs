// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Best-effort request audit.
//!
//! Audit rows are written by tasks tracked on a [`TaskTracker`]. A failed
//! write is logged and counted; it never reaches the request that caused
//! it. Shutdown waits for pending writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn, Instrument, Span};

use crate::crypto::KeyRing;
use crate::storage::{NewAuditEntry, Store};

#[derive(Clone)]
pub struct AuditWriter {
    store: Arc<dyn Store>,
    keys: Arc<KeyRing>,
    tracker: TaskTracker,
    failures: Arc<AtomicU64>,
}

#[derive(Serialize)]
struct RequestPayload<'a> {
    key: &'a str,
    value: &'a str,
}

/// Audit request payload: `{"key":...,"value":...}`.
pub fn request_payload(key: &str, value: &str) -> String {
    serde_json::to_string(&RequestPayload { key, value }).unwrap_or_default()
}

impl AuditWriter {
    pub fn new(store: Arc<dyn Store>, keys: Arc<KeyRing>) -> Self {
        Self {
            store,
            keys,
            tracker: TaskTracker::new(),
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue an audit row. Returns immediately.
    pub fn record(&self, entry: NewAuditEntry) {
        let store = Arc::clone(&self.store);
        let keys = Arc::clone(&self.keys);
        let failures = Arc::clone(&self.failures);

        self.tracker.spawn(
            async move {
                match store.insert_audit_log(&entry, &keys).await {
                    Ok(meta) => debug!(audit_id = meta.id, "Audit log written"),
                    Err(e) => {
                        failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            error = %e,
                            audit_trace_id = %entry.trace_id,
                            "Failed to write audit log"
                        );
                    }
                }
            }
            .instrument(Span::current()),
        );
    }

    /// Number of audit writes that failed since startup.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Wait for every queued write to finish, then keep accepting new ones.
    #[cfg(test)]
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stop accepting new writes and wait for pending ones.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
