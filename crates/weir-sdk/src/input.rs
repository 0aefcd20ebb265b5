//! Input capability: produce batches with acknowledgement callbacks.

use async_trait::async_trait;
use futures::future::BoxFuture;

use weir_types::{Batch, Error};

/// Acknowledgement callback handed out with every read.
///
/// Invoked with `Ok(())` once the batch has been durably handled, or with
/// the terminal error once retries are exhausted. An `Ok` ack commits the
/// source-side offset; an `Err` nacks and leaves the batch
/// redelivery-eligible.
pub type Acker = Box<dyn FnOnce(Result<(), Error>) -> BoxFuture<'static, Result<(), Error>> + Send>;

/// Build an [`Acker`] from an async closure.
pub fn ack_fn<F, Fut>(f: F) -> Acker
where
    F: FnOnce(Result<(), Error>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), Error>> + Send + 'static,
{
    Box::new(move |res| Box::pin(f(res)))
}

/// A source of message batches.
///
/// Guarantees the implementation must provide:
/// - **At-least-once**: the source offset is committed only inside the
///   [`Acker`], after a positive response was observed downstream.
/// - **Back-pressure**: `read_batch` is only called again after the
///   previous call returned; production blocks when the consumer does not
///   read.
///
/// Failure contract: return [`Error::NotConnected`] when the transport is
/// down (the surrounding chain reconnects with backoff) and
/// [`Error::TypeClosed`] once the source is exhausted or closed.
#[async_trait]
pub trait Input: Send {
    /// Establish the connection to the source.
    async fn connect(&mut self) -> Result<(), Error>;

    /// Read the next batch together with its acknowledgement callback.
    async fn read_batch(&mut self) -> Result<(Batch, Acker), Error>;

    /// Release resources. Idempotent: a second call returns `Ok`.
    async fn close(&mut self) -> Result<(), Error>;
}
