//! Processor chain execution.
//!
//! A chain applies processors in order. Each processor may expand a batch
//! into several; every produced batch flows through the remaining
//! processors. An empty production drops the batch; the owning
//! transaction is then acked as handled.

pub mod cache_op;
pub mod control;
pub mod group_by_value;
pub mod mapping;
pub mod resource;
pub mod throttle;

use weir_sdk::Processor;
use weir_types::{Batch, Error};

/// Run `batch` through the chain.
///
/// # Errors
///
/// Returns the first unrecoverable batch-level error; recoverable
/// failures stay on the parts' failure flags.
pub async fn run_chain(
    processors: &mut [Box<dyn Processor>],
    batch: Batch,
) -> Result<Vec<Batch>, Error> {
    let mut current = vec![batch];
    for processor in processors.iter_mut() {
        let mut produced = Vec::new();
        for batch in current.drain(..) {
            produced.extend(processor.process_batch(batch).await?);
        }
        if produced.is_empty() {
            return Ok(Vec::new());
        }
        current = produced;
    }
    Ok(current)
}

/// Close every processor in the chain, keeping the first error.
pub async fn close_chain(processors: &mut [Box<dyn Processor>]) -> Result<(), Error> {
    let mut first_err = None;
    for processor in processors.iter_mut() {
        if let Err(err) = processor.close().await {
            if first_err.is_none() {
                first_err = Some(err);
            }
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use weir_types::Part;

    struct Uppercase;

    #[async_trait]
    impl Processor for Uppercase {
        async fn process_batch(&mut self, batch: Batch) -> Result<Vec<Batch>, Error> {
            let mut out = Batch::new();
            for mut part in batch {
                let upper = String::from_utf8_lossy(part.as_bytes()?).to_uppercase();
                part.set_bytes(upper);
                out.push(part);
            }
            Ok(vec![out])
        }

        async fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    struct SplitParts;

    #[async_trait]
    impl Processor for SplitParts {
        async fn process_batch(&mut self, batch: Batch) -> Result<Vec<Batch>, Error> {
            Ok(batch
                .into_iter()
                .map(|p| [p].into_iter().collect())
                .collect())
        }

        async fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    struct DropAll;

    #[async_trait]
    impl Processor for DropAll {
        async fn process_batch(&mut self, _batch: Batch) -> Result<Vec<Batch>, Error> {
            Ok(Vec::new())
        }

        async fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    fn batch_of(contents: &[&str]) -> Batch {
        contents.iter().map(|c| Part::new(c.to_string())).collect()
    }

    #[tokio::test]
    async fn chain_applies_in_order_through_splits() {
        let mut chain: Vec<Box<dyn Processor>> =
            vec![Box::new(SplitParts), Box::new(Uppercase)];
        let out = run_chain(&mut chain, batch_of(&["a", "b"])).await.unwrap();
        assert_eq!(out.len(), 2);
        let mut payloads = Vec::new();
        for batch in out {
            for mut part in batch {
                payloads.push(String::from_utf8(part.bytes().unwrap().to_vec()).unwrap());
            }
        }
        assert_eq!(payloads, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn empty_production_aborts_the_chain() {
        let mut chain: Vec<Box<dyn Processor>> =
            vec![Box::new(DropAll), Box::new(Uppercase)];
        let out = run_chain(&mut chain, batch_of(&["a"])).await.unwrap();
        assert!(out.is_empty());
    }
}
