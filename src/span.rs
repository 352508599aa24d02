// SPDX-License-Identifier: MIT
//! Span data model — identity, timing, status, payload, and end semantics.
//!
//! Every backend hands out the same concrete [`Span`] handle; what differs per
//! backend is the [`SpanSink`] that receives the finished record when the span
//! ends.  A span is mutable until `end()` is called, after which every mutator
//! is a silent no-op and a second `end()` has no effect.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Attribute values are a closed sum over JSON scalars plus nested
/// maps/sequences — exactly `serde_json::Value`.
pub type AttrValue = serde_json::Value;

// ─── Enums ────────────────────────────────────────────────────────────────────

/// What role the traced operation plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanKind {
    #[default]
    Internal,
    Client,
    Server,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Internal => "INTERNAL",
            SpanKind::Client => "CLIENT",
            SpanKind::Server => "SERVER",
            SpanKind::Producer => "PRODUCER",
            SpanKind::Consumer => "CONSUMER",
        }
    }

    /// Lenient parse for stored rows — unknown values fall back to `Internal`.
    pub fn parse(s: &str) -> Self {
        match s {
            "CLIENT" => SpanKind::Client,
            "SERVER" => SpanKind::Server,
            "PRODUCER" => SpanKind::Producer,
            "CONSUMER" => SpanKind::Consumer,
            _ => SpanKind::Internal,
        }
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion status.  `Unset` until someone says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Unset => "UNSET",
            SpanStatus::Ok => "OK",
            SpanStatus::Error => "ERROR",
        }
    }

    /// Lenient parse for stored rows — unknown values fall back to `Unset`.
    pub fn parse(s: &str) -> Self {
        match s {
            "OK" => SpanStatus::Ok,
            "ERROR" => SpanStatus::Error,
            _ => SpanStatus::Unset,
        }
    }
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Events ───────────────────────────────────────────────────────────────────

/// A timestamped event appended to a span.  Append-only, ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: Vec<(String, AttrValue)>,
}

// ─── IDs ──────────────────────────────────────────────────────────────────────

/// 32-char lowercase hex, shared by every span in one causal chain.
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 16-char lowercase hex, process-unique for the lifetime of the tracer.
pub fn new_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

// ─── Span internals ───────────────────────────────────────────────────────────

/// Mutable state shared between clones of one span handle.
#[derive(Debug, Clone)]
pub struct SpanData {
    pub span_id: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: SpanStatus,
    pub status_message: Option<String>,
    /// Insertion-ordered; setting an existing key replaces the value in place.
    pub attributes: Vec<(String, AttrValue)>,
    pub events: Vec<SpanEvent>,
    pub ended: bool,
}

/// Lock the span state, recovering from poisoning.  Tracing must never panic
/// the caller; a poisoned lock just yields the last written state.
fn lock(data: &Arc<Mutex<SpanData>>) -> std::sync::MutexGuard<'_, SpanData> {
    data.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Receives the immutable record when a span ends.  Backends differ only here.
pub(crate) trait SpanSink: Send + Sync {
    fn on_end(&self, record: SpanRecord);
}

/// Sink for the null backend — the record evaporates.
pub(crate) struct NoopSink;

impl SpanSink for NoopSink {
    fn on_end(&self, _record: SpanRecord) {}
}

// ─── Span ─────────────────────────────────────────────────────────────────────

/// Handle to one traced operation.  Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Span {
    data: Arc<Mutex<SpanData>>,
    sink: Arc<dyn SpanSink>,
    /// Whether this span participates in the thread-local active-span stack.
    tracked: bool,
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = lock(&self.data);
        f.debug_struct("Span")
            .field("span_id", &data.span_id)
            .field("trace_id", &data.trace_id)
            .field("name", &data.name)
            .field("ended", &data.ended)
            .finish()
    }
}

impl Span {
    pub(crate) fn new(
        name: &str,
        trace_id: String,
        parent_span_id: Option<String>,
        kind: SpanKind,
        attributes: Vec<(String, AttrValue)>,
        sink: Arc<dyn SpanSink>,
        tracked: bool,
    ) -> Self {
        let data = SpanData {
            span_id: new_span_id(),
            trace_id,
            parent_span_id,
            name: name.to_string(),
            kind,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            status: SpanStatus::Unset,
            status_message: None,
            attributes,
            events: Vec::new(),
            ended: false,
        };
        Self {
            data: Arc::new(Mutex::new(data)),
            sink,
            tracked,
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    pub fn span_id(&self) -> String {
        lock(&self.data).span_id.clone()
    }

    pub fn trace_id(&self) -> String {
        lock(&self.data).trace_id.clone()
    }

    pub fn parent_span_id(&self) -> Option<String> {
        lock(&self.data).parent_span_id.clone()
    }

    pub fn name(&self) -> String {
        lock(&self.data).name.clone()
    }

    pub fn status(&self) -> SpanStatus {
        lock(&self.data).status
    }

    pub fn is_ended(&self) -> bool {
        lock(&self.data).ended
    }

    /// Point-in-time copy of the span's state, for inspection and tests.
    pub fn snapshot(&self) -> SpanData {
        lock(&self.data).clone()
    }

    // ─── Mutators — silent no-ops once the span has ended ────────────────────

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<AttrValue>) {
        let mut data = lock(&self.data);
        if data.ended {
            return;
        }
        let key = key.into();
        let value = value.into();
        if let Some(slot) = data.attributes.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            data.attributes.push((key, value));
        }
    }

    pub fn add_event(&self, name: impl Into<String>, attributes: Vec<(String, AttrValue)>) {
        let mut data = lock(&self.data);
        if data.ended {
            return;
        }
        data.events.push(SpanEvent {
            name: name.into(),
            timestamp: Utc::now(),
            attributes,
        });
    }

    pub fn set_status(&self, status: SpanStatus, message: Option<&str>) {
        let mut data = lock(&self.data);
        if data.ended {
            return;
        }
        data.status = status;
        data.status_message = message.map(|m| m.to_string());
    }

    /// Record a failure: status `Error` with the message, plus one `exception`
    /// event carrying the error's type and message.
    pub fn record_error(&self, error_type: &str, message: &str) {
        {
            let mut data = lock(&self.data);
            if data.ended {
                return;
            }
            data.status = SpanStatus::Error;
            data.status_message = Some(message.to_string());
            data.events.push(SpanEvent {
                name: "exception".to_string(),
                timestamp: Utc::now(),
                attributes: vec![
                    ("exception.type".to_string(), AttrValue::from(error_type)),
                    ("exception.message".to_string(), AttrValue::from(message)),
                ],
            });
        }
    }

    /// End the span.  Idempotent: the first call fixes `end_time` and
    /// `duration_ms` and hands the record to the backend; later calls do
    /// nothing.
    pub fn end(&self) {
        let record = {
            let mut data = lock(&self.data);
            if data.ended {
                return;
            }
            let end_time = Utc::now();
            data.end_time = Some(end_time);
            data.duration_ms = Some((end_time - data.start_time).num_milliseconds());
            data.ended = true;
            SpanRecord::from_data(&data)
        };
        if self.tracked {
            crate::context::pop(&record.span_id);
        }
        self.sink.on_end(record);
    }

    /// Scope the span: the returned guard ends it on drop, setting `Ok` when
    /// the status is still `Unset` on a normal exit and `Error` when the
    /// thread is unwinding.
    pub fn enter(&self) -> SpanGuard {
        SpanGuard { span: self.clone() }
    }
}

// ─── SpanGuard ────────────────────────────────────────────────────────────────

/// Ends its span on every exit path, including panics.
pub struct SpanGuard {
    span: Span,
}

impl SpanGuard {
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl std::ops::Deref for SpanGuard {
    type Target = Span;

    fn deref(&self) -> &Span {
        &self.span
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if !self.span.is_ended() {
            if self.span.status() == SpanStatus::Unset {
                if std::thread::panicking() {
                    self.span.set_status(SpanStatus::Error, Some("panicked"));
                } else {
                    self.span.set_status(SpanStatus::Ok, None);
                }
            }
            self.span.end();
        }
    }
}

// ─── SpanRecord ───────────────────────────────────────────────────────────────

/// The immutable, persistable form of an ended span — one row in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub span_id: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub status: SpanStatus,
    pub status_message: Option<String>,
    pub attributes: Vec<(String, AttrValue)>,
    pub events: Vec<SpanEvent>,
    /// Stamped by the owning tracer's config; empty for untagged backends.
    pub agent_id: String,
    pub project_id: String,
    pub classification: String,
    /// Set when the redaction pass modified any field.
    pub redacted: bool,
}

impl SpanRecord {
    fn from_data(data: &SpanData) -> Self {
        Self {
            span_id: data.span_id.clone(),
            trace_id: data.trace_id.clone(),
            parent_span_id: data.parent_span_id.clone(),
            name: data.name.clone(),
            kind: data.kind,
            start_time: data.start_time,
            end_time: data.end_time.unwrap_or(data.start_time),
            duration_ms: data.duration_ms.unwrap_or(0),
            status: data.status,
            status_message: data.status_message.clone(),
            attributes: data.attributes.clone(),
            events: data.events.clone(),
            agent_id: String::new(),
            project_id: String::new(),
            classification: String::new(),
            redacted: false,
        }
    }

    /// Attributes as a JSON object string for storage.
    pub fn attributes_json(&self) -> String {
        attrs_to_json(&self.attributes).to_string()
    }

    /// Events as a JSON array string for storage.
    pub fn events_json(&self) -> String {
        let events: Vec<AttrValue> = self
            .events
            .iter()
            .map(|e| {
                serde_json::json!({
                    "name": e.name,
                    "timestamp": e.timestamp.to_rfc3339(),
                    "attributes": attrs_to_json(&e.attributes),
                })
            })
            .collect();
        AttrValue::from(events).to_string()
    }
}

/// Collect attribute pairs into a JSON object (last write wins per key).
pub(crate) fn attrs_to_json(pairs: &[(String, AttrValue)]) -> AttrValue {
    let mut map = serde_json::Map::new();
    for (k, v) in pairs {
        map.insert(k.clone(), v.clone());
    }
    AttrValue::Object(map)
}

/// Parse a stored JSON object back into attribute pairs.
pub(crate) fn attrs_from_json(raw: &str) -> Vec<(String, AttrValue)> {
    match serde_json::from_str::<AttrValue>(raw) {
        Ok(AttrValue::Object(map)) => map.into_iter().collect(),
        _ => Vec::new(),
    }
}
