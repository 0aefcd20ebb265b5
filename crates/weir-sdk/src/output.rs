//! Output capability: write parts or whole batches to a sink.

use async_trait::async_trait;
use tokio::sync::Mutex;

use weir_types::{Batch, Error, Part};

/// A single-payload sink. Wrap with [`EachPart`] where the engine expects
/// a [`BatchOutput`].
#[async_trait]
pub trait Output: Send {
    /// Establish the connection to the sink.
    async fn connect(&mut self) -> Result<(), Error>;

    /// Write one part. Return [`Error::NotConnected`] to trigger the
    /// chain's reconnect loop.
    async fn write(&mut self, part: Part) -> Result<(), Error>;

    /// Release resources. Idempotent: a second call returns `Ok`.
    async fn close(&mut self) -> Result<(), Error>;
}

/// A batched sink.
///
/// Methods take `&self` because the surrounding chain runs up to
/// [`BatchOutput::max_in_flight`] writes concurrently against one
/// instance; implementations provide their own interior synchronisation.
/// Responses may therefore complete out of order relative to receipt.
/// Partial failures surface as [`Error::BatchPartial`] with per-index
/// details.
#[async_trait]
pub trait BatchOutput: Send + Sync {
    async fn connect(&self) -> Result<(), Error>;

    async fn write_batch(&self, batch: Batch) -> Result<(), Error>;

    /// Release resources. Idempotent: a second call returns `Ok`.
    async fn close(&self) -> Result<(), Error>;

    /// Declared write-phase concurrency. The surrounding chain enforces it.
    fn max_in_flight(&self) -> usize {
        1
    }
}

/// Adapter lifting a single-payload [`Output`] to the batched contract by
/// writing each part in order. A mid-batch failure is reported as a
/// partial batch error so the input can redeliver only the unwritten tail.
pub struct EachPart<T> {
    inner: Mutex<T>,
}

impl<T> EachPart<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

#[async_trait]
impl<T: Output> BatchOutput for EachPart<T> {
    async fn connect(&self) -> Result<(), Error> {
        self.inner.lock().await.connect().await
    }

    async fn write_batch(&self, batch: Batch) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        let total = batch.len();
        for (index, part) in batch.into_iter().enumerate() {
            if let Err(err) = inner.write(part).await {
                if index == 0 {
                    return Err(err);
                }
                let mut detail = weir_types::BatchError::new();
                for failed in index..total {
                    detail.fail(failed, err.to_string());
                }
                return Err(Error::BatchPartial(detail));
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.inner.lock().await.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyOutput {
        written: Vec<Vec<u8>>,
        fail_at: usize,
    }

    #[async_trait]
    impl Output for FlakyOutput {
        async fn connect(&mut self) -> Result<(), Error> {
            Ok(())
        }

        async fn write(&mut self, mut part: Part) -> Result<(), Error> {
            if self.written.len() == self.fail_at {
                return Err(Error::Connector("sink went away".into()));
            }
            self.written.push(part.as_bytes()?.to_vec());
            Ok(())
        }

        async fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    fn batch_of(contents: &[&str]) -> Batch {
        contents.iter().map(|c| Part::new(c.to_string())).collect()
    }

    #[tokio::test]
    async fn each_part_writes_in_order() {
        let out = EachPart::new(FlakyOutput {
            written: Vec::new(),
            fail_at: usize::MAX,
        });
        out.write_batch(batch_of(&["a", "b", "c"])).await.unwrap();
        assert_eq!(
            out.into_inner().written,
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
    }

    #[tokio::test]
    async fn each_part_reports_unwritten_tail() {
        let out = EachPart::new(FlakyOutput {
            written: Vec::new(),
            fail_at: 1,
        });
        let err = out.write_batch(batch_of(&["a", "b", "c"])).await.unwrap_err();
        match err {
            Error::BatchPartial(detail) => {
                assert!(detail.failed(0).is_none());
                assert!(detail.failed(1).is_some());
                assert!(detail.failed(2).is_some());
            }
            other => panic!("expected partial batch error, got {other}"),
        }
    }

    #[tokio::test]
    async fn each_part_first_write_failure_is_full_nack() {
        let out = EachPart::new(FlakyOutput {
            written: Vec::new(),
            fail_at: 0,
        });
        let err = out.write_batch(batch_of(&["a"])).await.unwrap_err();
        assert!(matches!(err, Error::Connector(_)));
    }
}
