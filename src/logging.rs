// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Structured logging.
//!
//! JSON output is one object per line, shaped for Cloud Logging:
//!
//! ```json
//! {"severity":"INFO","time":"2026-01-01T00:00:00.000Z","msg":"...","target":"...",
//!  "logging.googleapis.com/trace":"projects/p/traces/abc", ...fields}
//! ```
//!
//! The trace field is taken from the closest enclosing span that declared a
//! `trace_id` field (the request span opened by [`crate::trace`]).

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

pub const DEFAULT_FILTER: &str = "info,tower_http=info,sqlx=warn";
pub const TRACE_FIELD: &str = "logging.googleapis.com/trace";
const TRACE_ID_FIELD: &str = "trace_id";

/// Trace id attached to a span's extensions.
#[derive(Debug, Clone)]
struct SpanTraceId(String);

#[derive(Default)]
struct TraceIdVisitor(Option<String>);

impl Visit for TraceIdVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == TRACE_ID_FIELD {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == TRACE_ID_FIELD {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

/// Remembers the `trace_id` of each new span so the formatter can find it.
pub struct TraceCorrelationLayer;

impl<S> Layer<S> for TraceCorrelationLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = TraceIdVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(trace_id), Some(span)) = (visitor.0, ctx.span(id)) {
            span.extensions_mut().insert(SpanTraceId(trace_id));
        }
    }
}

/// Collects event fields into a JSON map; `message` is kept apart.
#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl JsonVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for JsonVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::from(format!("{value:?}")));
    }
}

fn severity(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG | Level::TRACE => "DEBUG",
    }
}

/// Event formatter producing Cloud Logging JSON lines.
#[derive(Debug, Clone, Default)]
pub struct CloudLoggingFormat {
    project_id: Option<String>,
}

impl CloudLoggingFormat {
    pub fn new(project_id: Option<String>) -> Self {
        Self { project_id }
    }

    /// `projects/{project}/traces/{id}` when a project is known, else the raw id.
    pub fn trace_value(&self, trace_id: &str) -> String {
        match &self.project_id {
            Some(project) => format!("projects/{project}/traces/{trace_id}"),
            None => trace_id.to_string(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for CloudLoggingFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let mut line = Map::new();
        line.insert("severity".into(), severity(metadata.level()).into());
        line.insert(
            "time".into(),
            Utc::now()
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .into(),
        );
        line.insert("msg".into(), visitor.message.unwrap_or_default().into());
        line.insert("target".into(), metadata.target().into());

        let trace_id = ctx.event_scope().and_then(|scope| {
            scope.into_iter().find_map(|span| {
                let extensions = span.extensions();
                extensions.get::<SpanTraceId>().map(|t| t.0.clone())
            })
        });
        if let Some(trace_id) = trace_id {
            line.insert(TRACE_FIELD.into(), self.trace_value(&trace_id).into());
        }

        for (key, value) in visitor.fields {
            line.entry(key).or_insert(value);
        }

        writeln!(writer, "{}", Value::Object(line))
    }
}

/// Install the global subscriber.
pub fn init(format: LogFormat, project_id: Option<String>) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(TraceCorrelationLayer);

    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(CloudLoggingFormat::new(project_id)),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    }
}
