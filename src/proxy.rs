// SPDX-License-Identifier: MIT
//! Swappable proxy tracer and the process-wide registry.
//!
//! Library code acquires the tracer once (`get_tracer()`) and still observes
//! a later runtime decision to enable a real backend: the proxy holds one
//! atomically swappable reference, defaulting to the null backend, and every
//! contract method delegates to whatever is installed at call time.

use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::buffered::store::SpanStore;
use crate::buffered::{BufferedConfig, BufferedTracer};
use crate::null::NullTracer;
use crate::span::{Span, SpanRecord};
use crate::tracer::{BackendSelector, SpanOptions, SpanQuery, Tracer};

// ─── ProxyTracer ──────────────────────────────────────────────────────────────

/// Sized cell for the trait object; `ArcSwap` needs a sized pointee.
struct Backend(Arc<dyn Tracer>);

/// Mutable indirection over exactly one active backend.
pub struct ProxyTracer {
    inner: ArcSwap<Backend>,
}

impl ProxyTracer {
    /// New proxy pointing at the null backend.
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::from_pointee(Backend(Arc::new(NullTracer::new()))),
        }
    }

    /// Atomically swap the active backend.  Spans already handed out keep
    /// their original backend; new spans go to the replacement.
    pub fn set_tracer(&self, tracer: Arc<dyn Tracer>) {
        self.inner.store(Arc::new(Backend(tracer)));
    }

    /// The currently installed backend.
    pub fn backend(&self) -> Arc<dyn Tracer> {
        Arc::clone(&self.inner.load().0)
    }
}

impl Default for ProxyTracer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tracer for ProxyTracer {
    fn start_span(&self, name: &str, opts: SpanOptions<'_>) -> Span {
        self.inner.load().0.start_span(name, opts)
    }

    fn active_span(&self) -> Option<Span> {
        self.inner.load().0.active_span()
    }

    async fn flush(&self) {
        self.backend().flush().await;
    }

    async fn query_spans(&self, query: SpanQuery) -> Vec<SpanRecord> {
        self.backend().query_spans(query).await
    }
}

// ─── Process-wide registry ────────────────────────────────────────────────────

static GLOBAL_TRACER: Lazy<ProxyTracer> = Lazy::new(ProxyTracer::new);

/// The process-wide tracer handle.  Safe to call from anywhere, any time:
/// before configuration it delegates to the null backend.
pub fn get_tracer() -> &'static ProxyTracer {
    &GLOBAL_TRACER
}

/// Install a backend on the process-wide proxy.
pub fn configure_tracer(tracer: Arc<dyn Tracer>) {
    GLOBAL_TRACER.set_tracer(tracer);
}

/// Restore the null backend.
pub fn disable_tracing() {
    GLOBAL_TRACER.set_tracer(Arc::new(NullTracer::new()));
}

// ─── Configuration-driven setup ───────────────────────────────────────────────

/// Already-resolved configuration values.  How they were loaded (environment,
/// YAML, flags) is the embedding application's concern.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Backend selector: `null` | `buffered` | `otel`.
    pub backend: String,
    /// Buffer length that triggers an automatic flush (buffered backend).
    pub flush_threshold: usize,
    pub agent_id: String,
    pub project_id: String,
    /// Default classification tag stamped onto stored spans.
    pub classification: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            backend: "null".to_string(),
            flush_threshold: 32,
            agent_id: String::new(),
            project_id: String::new(),
            classification: "UNCLASSIFIED".to_string(),
        }
    }
}

/// Build the selected backend and install it on the process-wide proxy.
///
/// Never fails: an unknown selector, a missing pool, or an unavailable
/// adapter logs a warning and falls back to the null backend.  Returns the
/// selector actually enabled.
pub async fn enable_tracing(config: TracingConfig, pool: Option<SqlitePool>) -> BackendSelector {
    let selector = match BackendSelector::from_str(&config.backend) {
        Ok(s) => s,
        Err(e) => {
            warn!(err = %e, "falling back to null tracing backend");
            BackendSelector::Null
        }
    };

    let enabled = match selector {
        BackendSelector::Null => {
            configure_tracer(Arc::new(NullTracer::new()));
            BackendSelector::Null
        }
        BackendSelector::Buffered => {
            let mut store = pool.map(SpanStore::new);
            if let Some(s) = &store {
                if let Err(e) = s.migrate().await {
                    warn!(err = %e, "span store migration failed — running degraded (spans will be dropped at flush)");
                    store = None;
                }
            } else {
                warn!("buffered tracing enabled without a database pool — spans will be dropped at flush");
            }
            let buffered = BufferedTracer::new(
                store,
                BufferedConfig {
                    flush_threshold: config.flush_threshold.max(1),
                    agent_id: config.agent_id.clone(),
                    project_id: config.project_id.clone(),
                    classification: config.classification.clone(),
                },
            );
            configure_tracer(Arc::new(buffered));
            BackendSelector::Buffered
        }
        BackendSelector::Otel => {
            #[cfg(feature = "otel")]
            let enabled = {
                configure_tracer(Arc::new(crate::otel::OtelTracer::new()));
                BackendSelector::Otel
            };
            #[cfg(not(feature = "otel"))]
            let enabled = {
                warn!("otel backend requested but the 'otel' feature is not enabled — falling back to null");
                configure_tracer(Arc::new(NullTracer::new()));
                BackendSelector::Null
            };
            enabled
        }
    };

    info!(backend = enabled.as_str(), "tracing configured");
    enabled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SpanStatus;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn proxy_defaults_to_null() {
        let proxy = ProxyTracer::new();
        let span = proxy.start_span("op", SpanOptions::default());
        span.end();
        assert!(proxy.active_span().is_none());
        assert!(proxy.query_spans(SpanQuery::default()).await.is_empty());
    }

    #[tokio::test]
    async fn swap_redirects_existing_handle() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        let store = SpanStore::new(pool);
        store.migrate().await.unwrap();

        let proxy = ProxyTracer::new();
        // Handle acquired while the null backend is active...
        let before = proxy.start_span("before", SpanOptions::default());
        before.end();

        proxy.set_tracer(Arc::new(BufferedTracer::new(
            Some(store.clone()),
            BufferedConfig {
                flush_threshold: 1,
                ..Default::default()
            },
        )));

        // ...still observes the swap without being re-acquired.
        let after = proxy.start_span("after", SpanOptions::default());
        after.set_status(SpanStatus::Ok, None);
        after.end();
        proxy.flush().await;

        let hits = proxy.query_spans(SpanQuery::default()).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "after");
    }

    #[tokio::test]
    async fn enable_tracing_unknown_selector_falls_back_to_null() {
        let _guard = crate::GLOBAL_TRACER_TEST_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let config = TracingConfig {
            backend: "jaeger".to_string(),
            ..Default::default()
        };
        assert_eq!(enable_tracing(config, None).await, BackendSelector::Null);
        disable_tracing();
    }

    #[tokio::test]
    async fn enable_buffered_without_pool_is_degraded_not_fatal() {
        let _guard = crate::GLOBAL_TRACER_TEST_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let config = TracingConfig {
            backend: "buffered".to_string(),
            ..Default::default()
        };
        assert_eq!(
            enable_tracing(config, None).await,
            BackendSelector::Buffered
        );
        let span = get_tracer().start_span("degraded", SpanOptions::default());
        span.end();
        get_tracer().flush().await;
        disable_tracing();
    }
}
