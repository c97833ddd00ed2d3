// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request trace propagation.
//!
//! The inbound `X-Cloud-Trace-Context` header has the form
//! `TRACE_ID/SPAN_ID;o=OPTIONS`; only `TRACE_ID` is used. Without it a fresh
//! id is generated. Every request runs inside a `request` span carrying the
//! id (picked up by [`crate::logging`]) and the response echoes it in
//! `X-Trace-ID`.

use std::convert::Infallible;
use std::future::Future;

use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tokio::time::Instant;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::state::AppState;
use crate::storage::{StoreError, StoreResult};

pub const CLOUD_TRACE_HEADER: &str = "x-cloud-trace-context";
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Trace id set on every request by [`trace_middleware`].
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub started: Instant,
}

/// Extract the trace id from an `X-Cloud-Trace-Context` value.
pub fn parse_trace_header(value: &str) -> Option<String> {
    let trace_id = value.split('/').next()?.split(';').next()?.trim();
    if trace_id.is_empty() {
        None
    } else {
        Some(trace_id.to_string())
    }
}

pub fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

pub async fn trace_middleware(mut request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(CLOUD_TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_trace_header)
        .unwrap_or_else(new_trace_id);

    request.extensions_mut().insert(TraceContext {
        trace_id: trace_id.clone(),
        started: Instant::now(),
    });

    let span = info_span!(
        "request",
        trace_id = %trace_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(TRACE_ID_HEADER), value);
    }
    response
}

/// Per-request context threaded through the service layer.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trace_id: String,
    pub deadline: Instant,
}

impl RequestContext {
    pub fn new(trace_id: impl Into<String>, deadline: Instant) -> Self {
        Self {
            trace_id: trace_id.into(),
            deadline,
        }
    }

    /// Run a storage call, abandoning it once the request deadline passes.
    pub async fn bounded<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout_at(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Transient(
                "request deadline exceeded".to_string(),
            )),
        }
    }
}

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let (trace_id, started) = match parts.extensions.get::<TraceContext>() {
            Some(ctx) => (ctx.trace_id.clone(), ctx.started),
            None => (new_trace_id(), Instant::now()),
        };
        Ok(Self::new(trace_id, started + state.request_timeout))
    }
}
