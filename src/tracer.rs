// SPDX-License-Identifier: MIT
//! The backend contract — every tracer implementation satisfies this trait.

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::span::{AttrValue, Span, SpanKind, SpanRecord};

// ─── Start options ────────────────────────────────────────────────────────────

/// Options for [`Tracer::start_span`].
///
/// `parent` overrides implicit inheritance from the thread's active span;
/// without it, backends that track context inherit from the active span, and
/// a fresh root trace is started when there is none.
#[derive(Default)]
pub struct SpanOptions<'a> {
    pub parent: Option<&'a Span>,
    pub kind: SpanKind,
    pub attributes: Vec<(String, AttrValue)>,
}

impl<'a> SpanOptions<'a> {
    pub fn child_of(parent: &'a Span) -> Self {
        Self {
            parent: Some(parent),
            ..Default::default()
        }
    }

    pub fn kind(kind: SpanKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }
}

// ─── Query ────────────────────────────────────────────────────────────────────

/// Read filter over persisted spans.  Present fields are AND-combined;
/// results come back newest-first, capped at `limit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanQuery {
    pub trace_id: Option<String>,
    pub project_id: Option<String>,
    pub name: Option<String>,
    pub limit: i64,
}

impl Default for SpanQuery {
    fn default() -> Self {
        Self {
            trace_id: None,
            project_id: None,
            name: None,
            limit: 100,
        }
    }
}

impl SpanQuery {
    pub fn for_trace(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: Some(trace_id.into()),
            ..Default::default()
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

// ─── Tracer contract ──────────────────────────────────────────────────────────

/// A tracing backend.
///
/// `start_span` never fails — a degraded backend still returns a usable span
/// and fails silently at flush time.  `flush` and `query_spans` never surface
/// errors to the caller: storage failures are logged and absorbed.
#[async_trait]
pub trait Tracer: Send + Sync {
    /// Create a span, already registered as the calling thread's active span
    /// for backends that track context.
    fn start_span(&self, name: &str, opts: SpanOptions<'_>) -> Span;

    /// The calling thread's innermost started-but-not-ended span.
    fn active_span(&self) -> Option<Span>;

    /// Force buffered spans to durable storage.  Never raises; on I/O
    /// failure the batch is logged and discarded.
    async fn flush(&self);

    /// Query persisted spans.  Returns an empty list — never an error — when
    /// the store is absent, the query fails, or nothing matches.
    async fn query_spans(&self, query: SpanQuery) -> Vec<SpanRecord>;
}

// ─── Backend selection ────────────────────────────────────────────────────────

/// Which backend a resolved configuration value names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSelector {
    Null,
    Buffered,
    Otel,
}

impl BackendSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendSelector::Null => "null",
            BackendSelector::Buffered => "buffered",
            BackendSelector::Otel => "otel",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown tracing backend '{0}' (expected null, buffered, or otel)")]
pub struct ParseBackendError(pub String);

impl FromStr for BackendSelector {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "null" | "none" | "disabled" => Ok(BackendSelector::Null),
            "buffered" | "sqlite" | "persistent" => Ok(BackendSelector::Buffered),
            "otel" | "opentelemetry" => Ok(BackendSelector::Otel),
            other => Err(ParseBackendError(other.to_string())),
        }
    }
}
