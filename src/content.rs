// SPDX-License-Identifier: MIT
//! Privacy-by-default content tagging.
//!
//! Instrumentation that wants to correlate spans with payload content records
//! a SHA-256 fingerprint, never the payload itself.  Plaintext is stored only
//! under an explicit opt-in policy — the caller must ask for it twice (once
//! in config, once per tag).

use sha2::{Digest, Sha256};

use crate::span::{AttrValue, Span};

/// Whether content tags may carry plaintext alongside their hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentPolicy {
    /// Record the plaintext value under the bare key.  Off by default.
    pub record_plaintext: bool,
}

impl ContentPolicy {
    pub fn hash_only() -> Self {
        Self {
            record_plaintext: false,
        }
    }

    pub fn with_plaintext() -> Self {
        Self {
            record_plaintext: true,
        }
    }
}

/// SHA-256 hex digest of a string.
pub fn hash_str(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of a JSON value's canonical serialization.
///
/// Object keys serialize in sorted order, so logically equal values hash
/// equally regardless of construction order.
pub fn hash_value(value: &AttrValue) -> String {
    hash_str(&value.to_string())
}

/// Tag a span with content: always `{key}_hash`, plaintext under `key` only
/// when the policy opts in.
pub fn set_content_tag(span: &Span, key: &str, value: &AttrValue, policy: &ContentPolicy) {
    span.set_attribute(format!("{key}_hash"), hash_value(value));
    if policy.record_plaintext {
        span.set_attribute(key, value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{new_trace_id, NoopSink, SpanKind};
    use std::sync::Arc;

    fn span() -> Span {
        Span::new(
            "tagged",
            new_trace_id(),
            None,
            SpanKind::Internal,
            Vec::new(),
            Arc::new(NoopSink),
            false,
        )
    }

    #[test]
    fn hash_is_deterministic_and_hex() {
        let v = AttrValue::from("sensitive payload");
        let a = hash_value(&v);
        let b = hash_value(&v);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_values_hash_differently() {
        assert_ne!(
            hash_value(&AttrValue::from("a")),
            hash_value(&AttrValue::from("b"))
        );
    }

    #[test]
    fn default_policy_records_hash_only() {
        let s = span();
        set_content_tag(&s, "prompt", &AttrValue::from("the plaintext"), &ContentPolicy::default());
        let data = s.snapshot();
        assert_eq!(data.attributes.len(), 1);
        assert_eq!(data.attributes[0].0, "prompt_hash");
    }

    #[test]
    fn opt_in_policy_records_plaintext_too() {
        let s = span();
        set_content_tag(
            &s,
            "prompt",
            &AttrValue::from("the plaintext"),
            &ContentPolicy::with_plaintext(),
        );
        let data = s.snapshot();
        assert_eq!(data.attributes.len(), 2);
        assert_eq!(data.attributes[1].0, "prompt");
        assert_eq!(data.attributes[1].1, AttrValue::from("the plaintext"));
    }
}
