//! Structured error model for stream components.
//!
//! [`Error`] is the single taxonomy that flows through transaction response
//! sinks. Retry wrappers and brokers dispatch on the variant; anything the
//! runtime cannot classify lands in [`Error::Processing`] or
//! [`Error::Connector`].

use std::collections::BTreeMap;
use std::fmt;

/// Per-index failure detail for a partially failed batch.
///
/// Inputs that track per-offset delivery may redeliver only the indices
/// recorded here; inputs without that granularity treat the whole batch as
/// nacked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchError {
    failed: BTreeMap<usize, String>,
}

impl BatchError {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for the part at `index`.
    pub fn fail(&mut self, index: usize, reason: impl Into<String>) {
        self.failed.insert(index, reason.into());
    }

    #[must_use]
    pub fn failed(&self, index: usize) -> Option<&str> {
        self.failed.get(&index).map(String::as_str)
    }

    /// Iterate failed indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.failed.iter().map(|(i, e)| (*i, e.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.failed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed parts: [", self.failed.len())?;
        for (n, (i, e)) in self.failed.iter().enumerate() {
            if n > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{i}: {e}")?;
        }
        f.write_str("]")
    }
}

/// Error taxonomy for the stream fabric.
///
/// Disposition per variant:
/// - [`Error::NotConnected`]: the surrounding wrapper reconnects with
///   backoff; the transaction does not advance.
/// - [`Error::Timeout`]: retried once by default; wrapper policy decides
///   beyond that.
/// - [`Error::TypeClosed`]: terminal; propagates upstream.
/// - [`Error::BatchPartial`]: the input may redeliver only the failed
///   indices.
/// - [`Error::Config`]: fatal at startup, never produced at runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Transport to the source or sink is down.
    #[error("not connected to target source or sink")]
    NotConnected,

    /// A deadline elapsed before the operation completed.
    #[error("action timed out")]
    Timeout,

    /// The component has been shut down.
    #[error("type was closed")]
    TypeClosed,

    /// The operation was interrupted by cancellation.
    #[error("action was cancelled")]
    Cancelled,

    /// Some parts of a batch failed; indices are recorded.
    #[error("batch failed: {0}")]
    BatchPartial(BatchError),

    /// Invalid configuration or lint violation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Business failure inside a processor.
    #[error("processing failed: {0}")]
    Processing(String),

    /// I/O failure inside a connector.
    #[error("connector error: {0}")]
    Connector(String),

    /// `add` against a key that already exists.
    #[error("key already exists")]
    KeyAlreadyExists,

    /// `get` against a key that does not exist.
    #[error("key does not exist")]
    KeyNotFound,

    /// Constructor lookup miss in an environment registry.
    #[error("unable to locate {kind} of type '{name}'")]
    UnknownComponent { kind: &'static str, name: String },

    /// Duplicate label within one registry.
    #[error("{kind} label '{label}' collides with an existing component")]
    DuplicateLabel { kind: &'static str, label: String },
}

impl Error {
    /// Returns `true` for transient transport failures that a retry wrapper
    /// should absorb rather than surface.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Timeout)
    }

    /// Returns `true` once the owning component can make no further
    /// progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TypeClosed | Self::Cancelled)
    }

    /// Wrap an I/O error as a connector failure.
    #[must_use]
    pub fn io(err: &std::io::Error) -> Self {
        Self::Connector(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_error_iterates_in_index_order() {
        let mut err = BatchError::new();
        err.fail(4, "late");
        err.fail(0, "early");
        err.fail(2, "middle");
        let order: Vec<usize> = err.iter().map(|(i, _)| i).collect();
        assert_eq!(order, vec![0, 2, 4]);
        assert_eq!(err.failed(2), Some("middle"));
        assert_eq!(err.failed(1), None);
    }

    #[test]
    fn batch_error_display_lists_indices() {
        let mut err = BatchError::new();
        err.fail(1, "boom");
        let msg = Error::BatchPartial(err).to_string();
        assert!(msg.contains("1 failed parts"));
        assert!(msg.contains("1: boom"));
    }

    #[test]
    fn transient_classification() {
        assert!(Error::NotConnected.is_transient());
        assert!(Error::Timeout.is_transient());
        assert!(!Error::TypeClosed.is_transient());
        assert!(!Error::Processing("x".into()).is_transient());
    }

    #[test]
    fn terminal_classification() {
        assert!(Error::TypeClosed.is_terminal());
        assert!(Error::Cancelled.is_terminal());
        assert!(!Error::NotConnected.is_terminal());
    }

    #[test]
    fn unknown_component_display() {
        let err = Error::UnknownComponent {
            kind: "input",
            name: "kafka".into(),
        };
        assert_eq!(err.to_string(), "unable to locate input of type 'kafka'");
    }
}
