// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Person Service - key/value store and encrypted person attributes
//!
//! An HTTP service over Postgres. Person attributes are encrypted at rest
//! with a versioned key ring, carry a monotonic row version for optimistic
//! locking, and mutations can be audited by trace id.
//!
//! ## Modules
//!
//! - `api` - HTTP handlers and router (Axum), OpenAPI document
//! - `attributes` - attribute validation, versioning and rename rules
//! - `audit` - best-effort audit writer
//! - `auth` - shared API key gate for `/persons/*`
//! - `crypto` - key ring and in-process value sealing
//! - `storage` - storage gateway trait with Postgres and in-memory backends
//! - `trace` - trace header propagation and request context
//! - `logging` - Cloud Logging compatible JSON output
//! - `server` - startup and graceful shutdown

pub mod api;
pub mod attributes;
pub mod audit;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod models;
pub mod server;
pub mod state;
pub mod storage;
pub mod trace;
