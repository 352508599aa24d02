// SPDX-License-Identifier: MIT
//! Buffered persistent backend.
//!
//! Ended spans are appended to a mutex-guarded buffer; when the buffer
//! reaches the configured threshold it is swapped for an empty one under the
//! lock and the drained batch is handed to a background writer task over an
//! unbounded channel (memory is already capped by flush batching, so the
//! queue only ever holds drained batches in flight).  I/O never happens
//! while holding the mutex, and nothing on the span path ever blocks the
//! caller: a failed write logs a warning and drops the batch.  Tracing must
//! never become a liveness hazard for the traced application.

pub mod store;

use std::mem;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::context;
use crate::redact;
use crate::span::{new_trace_id, Span, SpanRecord, SpanSink};
use crate::tracer::{SpanOptions, SpanQuery, Tracer};

use store::SpanStore;

// ─── Config ───────────────────────────────────────────────────────────────────

/// Resolved configuration values — loading them is the caller's problem.
#[derive(Debug, Clone)]
pub struct BufferedConfig {
    /// Buffer length that triggers an automatic flush.
    pub flush_threshold: usize,
    /// Stamped onto every persisted record.
    pub agent_id: String,
    pub project_id: String,
    /// Default classification tag for stored spans.
    pub classification: String,
}

impl Default for BufferedConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 32,
            agent_id: String::new(),
            project_id: String::new(),
            classification: "UNCLASSIFIED".to_string(),
        }
    }
}

// ─── Writer task ──────────────────────────────────────────────────────────────

enum WriterCmd {
    Write(Vec<SpanRecord>),
    Flush(oneshot::Sender<()>),
}

/// Drains the command channel.  Exits when every sender is gone.
async fn writer_task(mut rx: mpsc::UnboundedReceiver<WriterCmd>, store: Option<SpanStore>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriterCmd::Write(batch) => match &store {
                Some(store) => {
                    let count = batch.len();
                    if let Err(e) = store.insert_batch(&batch).await {
                        warn!(err = %e, dropped = count, "span flush failed — discarding batch");
                    } else {
                        debug!(count, "flushed spans");
                    }
                }
                None => {
                    debug!(dropped = batch.len(), "no span store configured — discarding batch");
                }
            },
            WriterCmd::Flush(ack) => {
                // The channel is FIFO, so acking here means every batch
                // queued before the flush request has been written.
                let _ = ack.send(());
            }
        }
    }
}

// ─── Sink ─────────────────────────────────────────────────────────────────────

struct BufferedSink {
    buffer: Mutex<Vec<SpanRecord>>,
    tx: mpsc::UnboundedSender<WriterCmd>,
    config: BufferedConfig,
}

impl BufferedSink {
    /// Swap the buffer for an empty one and return the drained batch.
    fn drain(&self) -> Vec<SpanRecord> {
        let mut buffer = self
            .buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mem::take(&mut *buffer)
    }
}

impl SpanSink for BufferedSink {
    fn on_end(&self, mut record: SpanRecord) {
        record.agent_id = self.config.agent_id.clone();
        record.project_id = self.config.project_id.clone();
        record.classification = self.config.classification.clone();
        redact::redact_record(&mut record);

        let batch = {
            let mut buffer = self
                .buffer
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            buffer.push(record);
            if buffer.len() >= self.config.flush_threshold {
                Some(mem::take(&mut *buffer))
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            if self.tx.send(WriterCmd::Write(batch)).is_err() {
                warn!("span writer gone — discarding batch");
            }
        }
    }
}

// ─── BufferedTracer ───────────────────────────────────────────────────────────

/// The persistent backend: generates ids, tracks the per-thread active span,
/// buffers ended spans, and flushes them transactionally.
///
/// Must be created inside a tokio runtime — the writer runs as a spawned
/// task.  A tracer built without a store still hands out fully usable spans
/// and silently drops every batch (degraded mode).
pub struct BufferedTracer {
    sink: Arc<BufferedSink>,
    store: Option<SpanStore>,
}

impl BufferedTracer {
    pub fn new(store: Option<SpanStore>, config: BufferedConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(rx, store.clone()));
        Self {
            sink: Arc::new(BufferedSink {
                buffer: Mutex::new(Vec::new()),
                tx,
                config,
            }),
            store,
        }
    }
}

#[async_trait]
impl Tracer for BufferedTracer {
    fn start_span(&self, name: &str, opts: SpanOptions<'_>) -> Span {
        // Inheritance priority: explicit parent, then this thread's active
        // span, then a fresh root trace.
        let (trace_id, parent_span_id) = match opts.parent {
            Some(parent) => (parent.trace_id(), Some(parent.span_id())),
            None => match context::current() {
                Some(active) => (active.trace_id(), Some(active.span_id())),
                None => (new_trace_id(), None),
            },
        };
        let span = Span::new(
            name,
            trace_id,
            parent_span_id,
            opts.kind,
            opts.attributes,
            Arc::clone(&self.sink) as Arc<dyn SpanSink>,
            true,
        );
        context::push(&span);
        span
    }

    fn active_span(&self) -> Option<Span> {
        context::current()
    }

    async fn flush(&self) {
        let batch = self.sink.drain();
        if !batch.is_empty() && self.sink.tx.send(WriterCmd::Write(batch)).is_err() {
            warn!("span writer gone — discarding flush batch");
            return;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.sink.tx.send(WriterCmd::Flush(ack_tx)).is_err() {
            warn!("span writer gone — flush skipped");
            return;
        }
        let _ = ack_rx.await;
    }

    async fn query_spans(&self, query: SpanQuery) -> Vec<SpanRecord> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        match store.query(&query).await {
            Ok(records) => records,
            Err(e) => {
                warn!(err = %e, "span query failed — returning empty");
                Vec::new()
            }
        }
    }
}
