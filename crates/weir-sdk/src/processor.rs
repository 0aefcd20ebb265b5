//! Processor capability: batch in, batches out.

use async_trait::async_trait;

use weir_types::{Batch, Error};

/// A batch transformation.
///
/// Contract: recoverable per-part failures are annotated on the part's
/// failure flag, not returned as an error; an `Err` return fails the whole
/// batch. Returning an empty vec drops the batch (its transaction is acked
/// as handled). Returning multiple batches fans out: each becomes its own
/// downstream transaction, and the upstream is acked only once all of them
/// resolve.
#[async_trait]
pub trait Processor: Send {
    async fn process_batch(&mut self, batch: Batch) -> Result<Vec<Batch>, Error>;

    /// Release resources. Idempotent: a second call returns `Ok`.
    async fn close(&mut self) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_types::Part;

    struct DropEven;

    #[async_trait]
    impl Processor for DropEven {
        async fn process_batch(&mut self, batch: Batch) -> Result<Vec<Batch>, Error> {
            let kept: Batch = batch
                .into_iter()
                .enumerate()
                .filter(|(i, _)| i % 2 == 1)
                .map(|(_, p)| p)
                .collect();
            if kept.is_empty() {
                Ok(vec![])
            } else {
                Ok(vec![kept])
            }
        }

        async fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_result_means_drop() {
        let mut proc = DropEven;
        let batch: Batch = [Part::new("only")].into_iter().collect();
        let out = proc.process_batch(batch).await.unwrap();
        assert!(out.is_empty());
    }
}
