// SPDX-License-Identifier: MIT
//! OpenTelemetry adapter backend (behind the `otel` feature).
//!
//! Spans are replayed onto the globally configured OpenTelemetry tracer when
//! they end, preserving their original identifiers and timestamps, so the
//! exported trace tree matches what the caller built regardless of which SDK
//! pipeline is installed.

use std::time::SystemTime;

use async_trait::async_trait;
use opentelemetry::trace::{
    SpanContext, SpanId, SpanKind as OtelSpanKind, Status, TraceContextExt, TraceFlags, TraceId,
    TraceState, Tracer as _,
};
use opentelemetry::{global, Context, KeyValue};
use tracing::warn;

use crate::context;
use crate::span::{AttrValue, Span, SpanKind, SpanRecord, SpanSink, SpanStatus};
use crate::tracer::{SpanOptions, SpanQuery, Tracer};

const TRACER_NAME: &str = "tracekit";

fn otel_kind(kind: SpanKind) -> OtelSpanKind {
    match kind {
        SpanKind::Internal => OtelSpanKind::Internal,
        SpanKind::Client => OtelSpanKind::Client,
        SpanKind::Server => OtelSpanKind::Server,
        SpanKind::Producer => OtelSpanKind::Producer,
        SpanKind::Consumer => OtelSpanKind::Consumer,
    }
}

fn otel_value(value: &AttrValue) -> opentelemetry::Value {
    match value {
        AttrValue::Bool(b) => (*b).into(),
        AttrValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into()
            } else if let Some(f) = n.as_f64() {
                f.into()
            } else {
                n.to_string().into()
            }
        }
        AttrValue::String(s) => s.clone().into(),
        other => other.to_string().into(),
    }
}

fn otel_attrs(attrs: &[(String, AttrValue)]) -> Vec<KeyValue> {
    attrs
        .iter()
        .map(|(k, v)| KeyValue::new(k.clone(), otel_value(v)))
        .collect()
}

// ─── Sink ─────────────────────────────────────────────────────────────────────

struct OtelSink;

impl OtelSink {
    fn replay(&self, record: &SpanRecord) -> Result<(), opentelemetry::trace::TraceError> {
        use opentelemetry::trace::TraceError;

        let trace_id = TraceId::from_hex(&record.trace_id)
            .map_err(|e| TraceError::Other(Box::new(e)))?;
        let span_id = SpanId::from_hex(&record.span_id)
            .map_err(|e| TraceError::Other(Box::new(e)))?;

        let mut attrs = otel_attrs(&record.attributes);
        if let Some(status_message) = &record.status_message {
            attrs.push(KeyValue::new("status.message", status_message.clone()));
        }

        let tracer = global::tracer(TRACER_NAME);
        let builder = tracer
            .span_builder(record.name.clone())
            .with_trace_id(trace_id)
            .with_span_id(span_id)
            .with_kind(otel_kind(record.kind))
            .with_start_time(SystemTime::from(record.start_time))
            .with_attributes(attrs);

        // Parentage is carried via a remote span context so the exported span
        // links to the parent id without requiring the parent to still exist.
        let parent_cx = match &record.parent_span_id {
            Some(parent_id) => {
                let parent_span_id =
                    SpanId::from_hex(parent_id).map_err(|e| TraceError::Other(Box::new(e)))?;
                Context::new().with_remote_span_context(SpanContext::new(
                    trace_id,
                    parent_span_id,
                    TraceFlags::SAMPLED,
                    false,
                    TraceState::default(),
                ))
            }
            None => Context::new(),
        };

        let mut span = builder.start_with_context(&tracer, &parent_cx);

        use opentelemetry::trace::Span as _;
        for event in &record.events {
            span.add_event_with_timestamp(
                event.name.clone(),
                SystemTime::from(event.timestamp),
                otel_attrs(&event.attributes),
            );
        }
        span.set_status(match record.status {
            SpanStatus::Unset => Status::Unset,
            SpanStatus::Ok => Status::Ok,
            SpanStatus::Error => Status::error(
                record
                    .status_message
                    .clone()
                    .unwrap_or_else(|| "error".to_string()),
            ),
        });
        span.end_with_timestamp(SystemTime::from(record.end_time));
        Ok(())
    }
}

impl SpanSink for OtelSink {
    fn on_end(&self, record: SpanRecord) {
        if let Err(e) = self.replay(&record) {
            warn!(err = %e, span = %record.name, "failed to export span to opentelemetry");
        }
    }
}

// ─── Tracer ───────────────────────────────────────────────────────────────────

/// Backend that forwards every ended span to the process's OpenTelemetry
/// pipeline.  Identifiers are generated locally in OTel-compatible widths;
/// export, batching, and shutdown belong to the installed SDK provider.
pub struct OtelTracer {
    sink: std::sync::Arc<OtelSink>,
}

impl OtelTracer {
    pub fn new() -> Self {
        Self {
            sink: std::sync::Arc::new(OtelSink),
        }
    }
}

impl Default for OtelTracer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tracer for OtelTracer {
    fn start_span(&self, name: &str, opts: SpanOptions<'_>) -> Span {
        let (trace_id, parent_span_id) = match opts.parent {
            Some(parent) => (parent.trace_id(), Some(parent.span_id())),
            None => match context::current() {
                Some(active) => (active.trace_id(), Some(active.span_id())),
                None => (crate::span::new_trace_id(), None),
            },
        };
        let span = Span::new(
            name,
            trace_id,
            parent_span_id,
            opts.kind,
            opts.attributes,
            std::sync::Arc::clone(&self.sink) as std::sync::Arc<dyn SpanSink>,
            true,
        );
        context::push(&span);
        span
    }

    fn active_span(&self) -> Option<Span> {
        context::current()
    }

    async fn flush(&self) {
        // Export happens synchronously at span end; SDK-side batching is
        // flushed by the provider the application installed.
    }

    async fn query_spans(&self, _query: SpanQuery) -> Vec<SpanRecord> {
        Vec::new()
    }
}
