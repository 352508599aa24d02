// SPDX-License-Identifier: MIT
//! End-to-end flows through the process-wide proxy: configuration, backend
//! swaps, and instrumented call sites observed at the store.

use std::sync::Mutex;

use sqlx::sqlite::SqlitePoolOptions;
use tracekit::{
    disable_tracing, enable_tracing, get_tracer, traced, BackendSelector, InstrumentOptions,
    SpanOptions, SpanQuery, SpanStatus, Tracer, TracingConfig,
};

// These tests reconfigure the shared global tracer and must run one at a time.
static GLOBAL: Mutex<()> = Mutex::new(());

fn serial() -> std::sync::MutexGuard<'static, ()> {
    GLOBAL.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

async fn memory_pool() -> sqlx::SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("in-memory sqlite pool")
}

#[tokio::test(flavor = "current_thread")]
async fn configured_backend_receives_instrumented_calls() {
    let _serial = serial();
    let pool = memory_pool().await;
    let config = TracingConfig {
        backend: "buffered".to_string(),
        flush_threshold: 1,
        project_id: "demo".to_string(),
        ..Default::default()
    };
    assert_eq!(
        enable_tracing(config, Some(pool)).await,
        BackendSelector::Buffered
    );

    let result: Result<u32, String> = traced("sum", InstrumentOptions::default(), |span| {
        span.set_attribute("terms", 2);
        Ok(40 + 2)
    });
    assert_eq!(result.unwrap(), 42);

    get_tracer().flush().await;
    let records = get_tracer()
        .query_spans(SpanQuery::default().with_name("sum"))
        .await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, SpanStatus::Ok);
    assert_eq!(records[0].project_id, "demo");

    disable_tracing();
}

#[tokio::test(flavor = "current_thread")]
async fn disabling_reverts_to_null_without_touching_old_data() {
    let _serial = serial();
    let pool = memory_pool().await;
    let config = TracingConfig {
        backend: "sqlite".to_string(),
        flush_threshold: 1,
        ..Default::default()
    };
    enable_tracing(config, Some(pool)).await;

    let kept = get_tracer().start_span("kept", SpanOptions::default());
    kept.end();
    get_tracer().flush().await;
    assert_eq!(
        get_tracer().query_spans(SpanQuery::default()).await.len(),
        1
    );

    disable_tracing();

    // Post-disable spans evaporate and queries return nothing.
    let lost = get_tracer().start_span("lost", SpanOptions::default());
    lost.end();
    get_tracer().flush().await;
    assert!(get_tracer().query_spans(SpanQuery::default()).await.is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_backend_selector_never_fails() {
    let _serial = serial();
    let config = TracingConfig {
        backend: "zipkin".to_string(),
        ..Default::default()
    };
    assert_eq!(enable_tracing(config, None).await, BackendSelector::Null);

    let span = get_tracer().start_span("still_works", SpanOptions::default());
    span.set_attribute("safe", true);
    span.end();
    disable_tracing();
}

#[cfg(not(feature = "otel"))]
#[tokio::test(flavor = "current_thread")]
async fn otel_without_feature_falls_back_to_null() {
    let _serial = serial();
    let config = TracingConfig {
        backend: "otel".to_string(),
        ..Default::default()
    };
    assert_eq!(enable_tracing(config, None).await, BackendSelector::Null);
    disable_tracing();
}
