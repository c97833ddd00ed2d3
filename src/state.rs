// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;
use std::time::Duration;

use crate::attributes::AttributeService;
use crate::audit::AuditWriter;
use crate::auth::ApiKeyGate;
use crate::config::{ConfigError, DEFAULT_API_KEY_HEADER, DEFAULT_REQUEST_TIMEOUT};
use crate::crypto::KeyRing;
use crate::storage::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub attributes: AttributeService,
    pub audit: AuditWriter,
    pub api_key_gate: ApiKeyGate,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        keys: KeyRing,
        api_key_gate: ApiKeyGate,
        request_timeout: Duration,
    ) -> Self {
        let keys = Arc::new(keys);
        let audit = AuditWriter::new(Arc::clone(&store), Arc::clone(&keys));
        let attributes = AttributeService::new(Arc::clone(&store), keys, audit.clone());
        Self {
            store,
            attributes,
            audit,
            api_key_gate,
            request_timeout,
        }
    }

    /// State over an arbitrary store with the default header and timeout.
    pub fn with_store(
        store: Arc<dyn Store>,
        keys: KeyRing,
        api_key: &crate::config::ApiKey,
    ) -> Result<Self, ConfigError> {
        let gate = ApiKeyGate::new(DEFAULT_API_KEY_HEADER, api_key)?;
        Ok(Self::new(store, keys, gate, DEFAULT_REQUEST_TIMEOUT))
    }
}
