//! A single message part: payload bytes, lazy structured value, metadata.
//!
//! [`Part`] is the unit record flowing through the fabric. The payload is
//! held as [`Bytes`] so copies share the underlying buffer; the structured
//! value is a lazily parsed `serde_json::Value` cache that is invalidated
//! on copy to prevent cross-contamination between pipeline branches.

use bytes::Bytes;
use indexmap::IndexMap;
use tracing::Span;

use crate::error::Error;

/// One conceptual record.
///
/// Invariant: at least one of the raw payload or the structured value is
/// always present. Setting the structured value drops the raw payload;
/// reading bytes after that re-serialises on demand.
#[derive(Debug)]
pub struct Part {
    payload: Option<Bytes>,
    structured: Option<serde_json::Value>,
    metadata: IndexMap<String, String>,
    failure: Option<String>,
    span: Span,
}

impl Part {
    /// Create a part from raw bytes.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: Some(payload.into()),
            structured: None,
            metadata: IndexMap::new(),
            failure: None,
            span: Span::none(),
        }
    }

    /// Create a part directly from a structured value.
    #[must_use]
    pub fn from_structured(value: serde_json::Value) -> Self {
        Self {
            payload: None,
            structured: Some(value),
            metadata: IndexMap::new(),
            failure: None,
            span: Span::none(),
        }
    }

    /// The raw payload, serialising the structured value if the raw bytes
    /// have been invalidated by a structured mutation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Processing`] if the structured value cannot be
    /// serialised.
    pub fn as_bytes(&mut self) -> Result<&Bytes, Error> {
        if self.payload.is_none() {
            let value = self
                .structured
                .as_ref()
                .ok_or_else(|| Error::Processing("part holds neither bytes nor value".into()))?;
            let raw = serde_json::to_vec(value)
                .map_err(|e| Error::Processing(format!("serialise structured value: {e}")))?;
            self.payload = Some(Bytes::from(raw));
        }
        Ok(self.payload.as_ref().expect("payload materialised above"))
    }

    /// Owned handle on the payload buffer (cheap, shared).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Processing`] if the structured value cannot be
    /// serialised.
    pub fn bytes(&mut self) -> Result<Bytes, Error> {
        Ok(self.as_bytes()?.clone())
    }

    /// The structured value, parsing the raw payload on first access.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Processing`] if the payload is not valid JSON.
    pub fn structured(&mut self) -> Result<&serde_json::Value, Error> {
        if self.structured.is_none() {
            let raw = self
                .payload
                .as_ref()
                .ok_or_else(|| Error::Processing("part holds neither bytes nor value".into()))?;
            let value: serde_json::Value = serde_json::from_slice(raw)
                .map_err(|e| Error::Processing(format!("parse structured value: {e}")))?;
            self.structured = Some(value);
        }
        Ok(self.structured.as_ref().expect("value parsed above"))
    }

    /// Replace the structured value, invalidating the raw payload.
    pub fn set_structured(&mut self, value: serde_json::Value) {
        self.structured = Some(value);
        self.payload = None;
    }

    /// Replace the raw payload, invalidating the structured cache.
    pub fn set_bytes(&mut self, payload: impl Into<Bytes>) {
        self.payload = Some(payload.into());
        self.structured = None;
    }

    // ── Metadata ────────────────────────────────────────────────────

    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn delete_meta(&mut self, key: &str) {
        self.metadata.shift_remove(key);
    }

    /// Iterate metadata in insertion order.
    pub fn meta_iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.metadata.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    // ── Failure flag ────────────────────────────────────────────────

    /// Mark the part as failed. Processors annotate here instead of
    /// returning a batch-level error for recoverable per-part failures.
    pub fn set_failed(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
    }

    /// Clear the failure flag (used by `catch`).
    pub fn clear_failed(&mut self) {
        self.failure = None;
    }

    #[must_use]
    pub fn failed(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    // ── Tracing context ─────────────────────────────────────────────

    /// Attach the ingress tracing span; propagated through copies and
    /// closed when the last handle drops on terminal ack.
    pub fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Deep copy: owns fresh payload storage and retains the parsed cache.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self {
            payload: self
                .payload
                .as_ref()
                .map(|b| Bytes::from(b.to_vec())),
            structured: self.structured.clone(),
            metadata: self.metadata.clone(),
            failure: self.failure.clone(),
            span: self.span.clone(),
        }
    }
}

/// The shallow copy: metadata cloned, payload bytes shared, structured
/// cache dropped so branches cannot observe each other's mutations. When
/// only the structured value exists it is carried over; there are no bytes
/// to share yet.
impl Clone for Part {
    fn clone(&self) -> Self {
        let structured = if self.payload.is_none() {
            self.structured.clone()
        } else {
            None
        };
        Self {
            payload: self.payload.clone(),
            structured,
            metadata: self.metadata.clone(),
            failure: self.failure.clone(),
            span: self.span.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lazy_parse_and_reserialise() {
        let mut part = Part::new(r#"{"k":1}"#);
        assert_eq!(part.structured().unwrap(), &json!({"k": 1}));

        part.set_structured(json!({"k": 2}));
        assert_eq!(part.as_bytes().unwrap().as_ref(), br#"{"k":2}"#);
    }

    #[test]
    fn invalid_json_errors() {
        let mut part = Part::new("not json");
        assert!(matches!(part.structured(), Err(Error::Processing(_))));
    }

    #[test]
    fn set_bytes_invalidates_structured_cache() {
        let mut part = Part::new(r#"{"a":1}"#);
        let _ = part.structured().unwrap();
        part.set_bytes(r#"{"a":2}"#);
        assert_eq!(part.structured().unwrap(), &json!({"a": 2}));
    }

    #[test]
    fn clone_shares_payload_and_drops_cache() {
        let mut original = Part::new(r#"{"x":true}"#);
        let _ = original.structured().unwrap();

        let mut copy = original.clone();
        // Copy re-parses from the shared bytes rather than seeing the
        // original's cached value.
        assert_eq!(copy.structured().unwrap(), &json!({"x": true}));

        copy.set_structured(json!({"x": false}));
        assert_eq!(original.structured().unwrap(), &json!({"x": true}));
    }

    #[test]
    fn clone_of_value_only_part_keeps_value() {
        let part = Part::from_structured(json!([1, 2, 3]));
        let mut copy = part.clone();
        assert_eq!(copy.structured().unwrap(), &json!([1, 2, 3]));
    }

    #[test]
    fn metadata_insertion_order() {
        let mut part = Part::new("x");
        part.set_meta("b", "2");
        part.set_meta("a", "1");
        part.set_meta("c", "3");
        let keys: Vec<&str> = part.meta_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);

        part.delete_meta("a");
        let keys: Vec<&str> = part.meta_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn failure_flag_lifecycle() {
        let mut part = Part::new("x");
        assert!(part.failed().is_none());
        part.set_failed("bad record");
        assert_eq!(part.failed(), Some("bad record"));
        part.clear_failed();
        assert!(part.failed().is_none());
    }

    #[test]
    fn deep_copy_owns_storage() {
        let mut part = Part::new(r#"{"k":"v"}"#);
        let _ = part.structured().unwrap();
        let mut deep = part.deep_copy();
        // Deep copy retains the parsed cache.
        assert_eq!(deep.structured().unwrap(), &json!({"k": "v"}));
    }
}
