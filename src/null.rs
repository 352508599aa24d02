// SPDX-License-Identifier: MIT
//! Null backend — the zero-cost default.
//!
//! Spans carry real IDs (so explicit parent/child linkage still works) but
//! nothing is buffered, persisted, or tracked.  Instrumentation scattered
//! through application code costs effectively nothing until a real backend
//! is swapped in.

use std::sync::Arc;

use async_trait::async_trait;

use crate::span::{new_trace_id, NoopSink, Span, SpanRecord};
use crate::tracer::{SpanOptions, SpanQuery, Tracer};

/// Tracer that satisfies the contract and does nothing else.
#[derive(Default)]
pub struct NullTracer;

impl NullTracer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tracer for NullTracer {
    fn start_span(&self, name: &str, opts: SpanOptions<'_>) -> Span {
        let (trace_id, parent_span_id) = match opts.parent {
            Some(parent) => (parent.trace_id(), Some(parent.span_id())),
            None => (new_trace_id(), None),
        };
        Span::new(
            name,
            trace_id,
            parent_span_id,
            opts.kind,
            opts.attributes,
            Arc::new(NoopSink),
            false,
        )
    }

    fn active_span(&self) -> Option<Span> {
        None
    }

    async fn flush(&self) {}

    async fn query_spans(&self, _query: SpanQuery) -> Vec<SpanRecord> {
        Vec::new()
    }
}
