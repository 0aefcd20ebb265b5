//! Metrics facade.
//!
//! The runtime counts transactions, acks, and errors through this trait;
//! exporters live outside the core. [`NoopMetrics`] is the default,
//! [`TracingMetrics`] debug-logs every emission for development.

use std::sync::Arc;
use std::time::Duration;

/// Object-safe metrics sink.
pub trait Metrics: Send + Sync {
    fn counter(&self, name: &'static str, value: u64);

    fn gauge(&self, name: &'static str, value: i64);

    fn timing(&self, name: &'static str, elapsed: Duration);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn counter(&self, _name: &'static str, _value: u64) {}

    fn gauge(&self, _name: &'static str, _value: i64) {}

    fn timing(&self, _name: &'static str, _elapsed: Duration) {}
}

/// Emits every metric as a `tracing` debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl Metrics for TracingMetrics {
    fn counter(&self, name: &'static str, value: u64) {
        tracing::debug!(metric = name, value, "counter");
    }

    fn gauge(&self, name: &'static str, value: i64) {
        tracing::debug!(metric = name, value, "gauge");
    }

    fn timing(&self, name: &'static str, elapsed: Duration) {
        tracing::debug!(metric = name, elapsed_ms = elapsed.as_millis() as u64, "timing");
    }
}

/// Shared metrics handle used throughout the engine.
pub type MetricsHandle = Arc<dyn Metrics>;

/// The default handle.
#[must_use]
pub fn noop() -> MetricsHandle {
    Arc::new(NoopMetrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_is_object_safe() {
        let m: MetricsHandle = noop();
        m.counter("input_received", 1);
        m.gauge("buffer_backlog", 3);
        m.timing("write_latency", Duration::from_millis(2));
    }
}
