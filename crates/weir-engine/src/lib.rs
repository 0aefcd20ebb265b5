//! The weir stream fabric.
//!
//! Wires inputs, the parallel processing pipeline, an optional buffer, and
//! outputs into one transactional graph with at-least-once delivery.
//! Components communicate exclusively through channels carrying
//! [`Transaction`]s; every batch is acknowledged exactly once.

pub mod batcher;
pub mod buffer;
pub mod cache;
pub mod config;
pub mod environment;
pub mod error;
pub mod input;
pub mod interpolate;
pub mod manager;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod processor;
pub mod rate_limit;
pub mod resources;
pub mod stream;
pub mod transaction;

pub use environment::Environment;
pub use error::{compute_backoff, EngineError};
pub use manager::{StreamManager, StreamStatus};
pub use resources::Resources;
pub use stream::{Stream, StreamState};
pub use transaction::{Response, ResponseRx, Transaction};
