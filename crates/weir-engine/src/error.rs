//! Engine error model and retry backoff helpers.

use std::time::Duration;

use weir_types::Error;

const BACKOFF_BASE_MS: u64 = 100;
const BACKOFF_MAX_MS: u64 = 30_000;

/// Categorised engine error for supervision decisions.
///
/// `Component` wraps the typed [`Error`] taxonomy flowing through
/// transaction sinks. `Infrastructure` wraps opaque host-side failures
/// (task join errors, channel wiring, config I/O) that are never
/// retryable at the component level.
#[derive(Debug)]
pub enum EngineError {
    /// Typed component error.
    Component(Error),
    /// Host-side failure (task join, channel wiring, config I/O).
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Component(e) => write!(f, "{e}"),
            Self::Infrastructure(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<Error> for EngineError {
    fn from(e: Error) -> Self {
        Self::Component(e)
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl EngineError {
    /// Returns `true` if the wrapped error is a transient transport
    /// failure worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Component(e) => e.is_transient(),
            Self::Infrastructure(_) => false,
        }
    }

    /// Returns the typed component error if this is a `Component` variant.
    #[must_use]
    pub fn as_component(&self) -> Option<&Error> {
        match self {
            Self::Component(e) => Some(e),
            Self::Infrastructure(_) => None,
        }
    }
}

/// Exponential backoff for reconnect and retry loops.
///
/// `attempt` counts from 1. The delay doubles per attempt from `base` and
/// is capped at `cap`.
#[must_use]
pub fn compute_backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    let delay = base.saturating_mul(2_u32.saturating_pow(exp));
    delay.min(cap)
}

/// Default backoff curve for transport reconnects.
#[must_use]
pub fn default_backoff(attempt: u32) -> Duration {
    compute_backoff(
        attempt,
        Duration::from_millis(BACKOFF_BASE_MS),
        Duration::from_millis(BACKOFF_MAX_MS),
    )
}
