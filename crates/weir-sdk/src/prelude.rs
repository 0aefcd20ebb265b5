//! Convenience re-exports for component implementations.

pub use crate::cache::Cache;
pub use crate::input::{ack_fn, Acker, Input};
pub use crate::output::{BatchOutput, EachPart, Output};
pub use crate::processor::Processor;
pub use crate::rate_limit::RateLimit;
pub use async_trait::async_trait;
pub use weir_types::{Batch, BatchError, Error, Part};
