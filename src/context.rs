// SPDX-License-Identifier: MIT
//! Thread-local active-span stack.
//!
//! One stack per thread: a span is pushed when the backend starts it and
//! popped (by id) when it ends, so the parent becomes active again after a
//! child completes.  Per-thread state needs no locking.
//!
//! A span ended on a different thread than it started on leaves a stale entry
//! behind; `current()` prunes ended spans lazily, so the stale entry is
//! skipped and removed the next time that thread consults its stack.

use std::cell::RefCell;

use crate::span::Span;

thread_local! {
    static ACTIVE: RefCell<Vec<Span>> = const { RefCell::new(Vec::new()) };
}

/// Make `span` this thread's innermost active span.
pub(crate) fn push(span: &Span) {
    ACTIVE.with(|stack| stack.borrow_mut().push(span.clone()));
}

/// Remove the innermost entry with the given span id, if present.
pub(crate) fn pop(span_id: &str) {
    ACTIVE.with(|stack| {
        let mut stack = stack.borrow_mut();
        if let Some(idx) = stack.iter().rposition(|s| s.span_id() == span_id) {
            stack.remove(idx);
        }
    });
}

/// The innermost not-yet-ended span on this thread, pruning ended leftovers.
pub(crate) fn current() -> Option<Span> {
    ACTIVE.with(|stack| {
        let mut stack = stack.borrow_mut();
        while let Some(top) = stack.last() {
            if top.is_ended() {
                stack.pop();
            } else {
                return Some(top.clone());
            }
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{new_trace_id, NoopSink, SpanKind};
    use std::sync::Arc;

    fn span(name: &str) -> Span {
        Span::new(
            name,
            new_trace_id(),
            None,
            SpanKind::Internal,
            Vec::new(),
            Arc::new(NoopSink),
            false,
        )
    }

    #[test]
    fn parent_becomes_active_after_child_ends() {
        let parent = span("parent");
        let child = span("child");
        push(&parent);
        push(&child);
        assert_eq!(current().unwrap().span_id(), child.span_id());
        pop(&child.span_id());
        assert_eq!(current().unwrap().span_id(), parent.span_id());
        pop(&parent.span_id());
        assert!(current().is_none());
    }

    #[test]
    fn ended_spans_are_pruned() {
        let s = span("stale");
        push(&s);
        s.end();
        assert!(current().is_none());
    }

    #[test]
    fn stacks_are_per_thread() {
        let s = span("main-thread");
        push(&s);
        let handle = std::thread::spawn(|| current().is_none());
        assert!(handle.join().unwrap());
        pop(&s.span_id());
    }
}
