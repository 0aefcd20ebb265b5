//! Shared message model and error taxonomy for the weir stream runtime.
//!
//! This crate is dependency-boundary-safe for both the engine and component
//! implementations: no async runtime, no I/O.

pub mod batch;
pub mod error;
pub mod part;

pub use batch::Batch;
pub use error::{BatchError, Error};
pub use part::Part;
