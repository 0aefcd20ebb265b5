//! Capability traits implemented by weir stream components.
//!
//! Connectors implement one of the traits below and are driven by the
//! engine's chain tasks. Every trait is object-safe: the engine stores
//! components as boxed trait objects resolved from an environment registry.

pub mod cache;
pub mod input;
pub mod output;
pub mod prelude;
pub mod processor;
pub mod rate_limit;

pub use cache::Cache;
pub use input::{ack_fn, Acker, Input};
pub use output::{BatchOutput, EachPart, Output};
pub use processor::Processor;
pub use rate_limit::RateLimit;
