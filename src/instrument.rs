// SPDX-License-Identifier: MIT
//! Span-per-call instrumentation helpers.
//!
//! These wrappers put a span around a closure or an iterator and take care of
//! the bookkeeping a caller would otherwise repeat at every site: parent
//! inheritance, status on success and failure, error capture, and exactly-once
//! end even across panics and abandoned iterators.
//!
//! Argument and result values are never stored in plaintext.  When provided,
//! they are fingerprinted through [`crate::content`] so two invocations can be
//! correlated without the trace carrying the data itself.

use std::fmt::Display;

use serde::Serialize;

use crate::content::hash_value;
use crate::proxy::get_tracer;
use crate::span::{AttrValue, Span, SpanKind, SpanStatus};
use crate::tracer::{SpanOptions, Tracer};

/// Per-call-site knobs for the `traced*` wrappers.
#[derive(Default)]
pub struct InstrumentOptions {
    pub kind: SpanKind,
    /// Defining module, typically `module_path!()`.  Recorded as
    /// `code.module` when present.
    pub module: Option<String>,
    /// Extra attributes set before the wrapped code runs.
    pub attributes: Vec<(String, AttrValue)>,
    /// Call arguments to fingerprint into `code.args_hash`.
    pub args: Option<AttrValue>,
}

impl InstrumentOptions {
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn in_module(mut self, module: &str) -> Self {
        self.module = Some(module.to_string());
        self
    }

    pub fn with_attribute(mut self, key: &str, value: AttrValue) -> Self {
        self.attributes.push((key.to_string(), value));
        self
    }

    pub fn with_args<T: Serialize>(mut self, args: &T) -> Self {
        self.args = serde_json::to_value(args).ok();
        self
    }
}

fn start_instrumented(name: &str, opts: &InstrumentOptions) -> Span {
    let span = get_tracer().start_span(name, SpanOptions::kind(opts.kind));
    span.set_attribute("code.function", AttrValue::from(name));
    if let Some(module) = &opts.module {
        span.set_attribute("code.module", AttrValue::from(module.as_str()));
    }
    for (key, value) in &opts.attributes {
        span.set_attribute(key, value.clone());
    }
    if let Some(args) = &opts.args {
        span.set_attribute("code.args_hash", AttrValue::from(hash_value(args)));
    }
    span
}

/// Run `f` inside a span.  The guard ends the span when `f` returns or
/// unwinds; a panic leaves an `ERROR` status behind.
pub fn with_span<T>(name: &str, opts: SpanOptions<'_>, f: impl FnOnce(&Span) -> T) -> T {
    let span = get_tracer().start_span(name, opts);
    let guard = span.enter();
    f(guard.span())
}

/// Instrument a fallible call.
///
/// On `Ok` the span closes with `OK`; on `Err` the error is recorded on the
/// span (type and message) and then returned to the caller unchanged.
pub fn traced<T, E: Display>(
    name: &str,
    opts: InstrumentOptions,
    f: impl FnOnce(&Span) -> Result<T, E>,
) -> Result<T, E> {
    let span = start_instrumented(name, &opts);
    let guard = span.enter();
    match f(guard.span()) {
        Ok(value) => {
            guard.span().set_status(SpanStatus::Ok, None);
            Ok(value)
        }
        Err(err) => {
            guard.span().record_error(std::any::type_name::<E>(), &err.to_string());
            Err(err)
        }
    }
}

/// Like [`traced`], additionally fingerprinting the success value into
/// `code.result_hash`.
pub fn traced_with_result<T: Serialize, E: Display>(
    name: &str,
    opts: InstrumentOptions,
    f: impl FnOnce(&Span) -> Result<T, E>,
) -> Result<T, E> {
    let span = start_instrumented(name, &opts);
    let guard = span.enter();
    match f(guard.span()) {
        Ok(value) => {
            if let Ok(json) = serde_json::to_value(&value) {
                if !json.is_null() {
                    guard
                        .span()
                        .set_attribute("code.result_hash", AttrValue::from(hash_value(&json)));
                }
            }
            guard.span().set_status(SpanStatus::Ok, None);
            Ok(value)
        }
        Err(err) => {
            guard.span().record_error(std::any::type_name::<E>(), &err.to_string());
            Err(err)
        }
    }
}

// ─── Iterator instrumentation ─────────────────────────────────────────────────

/// Iterator wrapper whose span covers the whole consumption of the inner
/// iterator, not just its construction.
pub struct TracedIter<I> {
    inner: I,
    span: Span,
    items: u64,
}

impl<I: Iterator> Iterator for TracedIter<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            Some(item) => {
                self.items += 1;
                Some(item)
            }
            None => {
                self.span.set_attribute("items", AttrValue::from(self.items));
                // A recorded failure (e.g. an Err item) must survive
                // exhaustion; only an untouched status becomes Ok.
                if self.span.status() == SpanStatus::Unset {
                    self.span.set_status(SpanStatus::Ok, None);
                }
                self.span.end();
                None
            }
        }
    }
}

impl<I> Drop for TracedIter<I> {
    // Abandoned mid-iteration: close with whatever was counted so far.
    fn drop(&mut self) {
        if !self.span.is_ended() {
            self.span.set_attribute("items", AttrValue::from(self.items));
            self.span.end();
        }
    }
}

/// Wrap an iterator in a span that ends at exhaustion (or abandonment),
/// recording the number of items yielded.
pub fn traced_iter<I: Iterator>(name: &str, opts: InstrumentOptions, inner: I) -> TracedIter<I> {
    TracedIter {
        inner,
        span: start_instrumented(name, &opts),
        items: 0,
    }
}

/// [`TracedIter`] for streams of `Result` items: the first `Err` marks the
/// span failed, items still pass through untouched.
pub struct TracedTryIter<I> {
    inner: TracedIter<I>,
}

impl<I, T, E> Iterator for TracedTryIter<I>
where
    I: Iterator<Item = Result<T, E>>,
    E: Display,
{
    type Item = Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        if let Err(err) = &item {
            self.inner
                .span
                .record_error(std::any::type_name::<E>(), &err.to_string());
        }
        Some(item)
    }
}

pub fn traced_try_iter<I, T, E>(
    name: &str,
    opts: InstrumentOptions,
    inner: I,
) -> TracedTryIter<I>
where
    I: Iterator<Item = Result<T, E>>,
    E: Display,
{
    TracedTryIter {
        inner: traced_iter(name, opts, inner),
    }
}
