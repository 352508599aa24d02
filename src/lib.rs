// SPDX-License-Identifier: MIT
//! Pluggable distributed tracing for agent workloads.
//!
//! The crate separates the act of tracing from the fate of the data: callers
//! create and annotate [`Span`]s through one [`Tracer`] contract, and backends
//! decide what an ended span is worth.  The null backend discards everything
//! at near-zero cost, the buffered backend batches spans into SQLite, and the
//! optional `otel` backend replays them onto an OpenTelemetry pipeline.
//!
//! Library code obtains the process-wide tracer once and holds it forever:
//!
//! ```no_run
//! use tracekit::{get_tracer, SpanOptions, Tracer};
//!
//! let span = get_tracer().start_span("index_repo", SpanOptions::default());
//! span.set_attribute("repo.files", 412);
//! span.end();
//! ```
//!
//! The handle delegates to whichever backend [`enable_tracing`] installed —
//! before configuration that is the null backend, so tracing calls are always
//! safe.
//!
//! Content carried in attributes is privacy-sensitive by default: the
//! [`content`] helpers store SHA-256 fingerprints unless a caller opts into
//! plaintext, and the buffered backend runs a credential-redaction pass before
//! anything touches disk.

mod context;
mod redact;

// Tests that reconfigure the process-wide tracer must hold this lock.
#[cfg(test)]
pub(crate) static GLOBAL_TRACER_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

pub mod buffered;
pub mod content;
pub mod instrument;
pub mod null;
pub mod proxy;
pub mod span;
pub mod tracer;

#[cfg(feature = "otel")]
pub mod otel;

pub use buffered::store::SpanStore;
pub use buffered::{BufferedConfig, BufferedTracer};
pub use content::{set_content_tag, ContentPolicy};
pub use instrument::{
    traced, traced_iter, traced_try_iter, traced_with_result, with_span, InstrumentOptions,
};
pub use null::NullTracer;
pub use proxy::{
    configure_tracer, disable_tracing, enable_tracing, get_tracer, ProxyTracer, TracingConfig,
};
pub use span::{AttrValue, Span, SpanData, SpanEvent, SpanGuard, SpanKind, SpanRecord, SpanStatus};
pub use tracer::{BackendSelector, SpanOptions, SpanQuery, Tracer};

#[cfg(feature = "otel")]
pub use otel::OtelTracer;
