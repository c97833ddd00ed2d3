// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Shared static credential for the `/persons/*` surface.
//!
//! ## Auth Flow
//!
//! 1. The caller sends the configured header (default `x-api-key`)
//! 2. The middleware compares it with `API_KEY`
//! 3. Missing or wrong values are answered with `401` before any handler runs
//!
//! `/health`, `/api/key-value` and `/docs` are not behind the gate.

pub mod error;
pub mod middleware;

pub use error::AuthError;
pub use middleware::{require_api_key, ApiKeyGate};
