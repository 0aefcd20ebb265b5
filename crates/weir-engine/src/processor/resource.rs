//! Processor referenced by label through the resource manager.
//!
//! Each call borrows the labelled instance for exactly one batch, so a
//! hot replacement lands between batches, never mid-batch.

use std::sync::Arc;

use async_trait::async_trait;

use weir_sdk::Processor;
use weir_types::{Batch, Error};

use crate::resources::Resources;

pub struct ResourceProcessor {
    label: String,
    resources: Arc<Resources>,
}

impl ResourceProcessor {
    #[must_use]
    pub fn new(label: String, resources: Arc<Resources>) -> Self {
        Self { label, resources }
    }
}

#[async_trait]
impl Processor for ResourceProcessor {
    async fn process_batch(&mut self, batch: Batch) -> Result<Vec<Batch>, Error> {
        let mut guard = self.resources.access_processor(&self.label).await?;
        guard.process_batch(batch).await
    }

    async fn close(&mut self) -> Result<(), Error> {
        // The underlying instance belongs to the resource manager and
        // outlives this reference.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::mapping::MappingProcessor;
    use weir_types::Part;

    #[tokio::test]
    async fn delegates_to_registered_instance() {
        let resources = Arc::new(Resources::new());
        resources
            .register_processor(
                "upper",
                Box::new(MappingProcessor::new("root = content().uppercase()").unwrap()),
            )
            .await
            .unwrap();

        let mut proc = ResourceProcessor::new("upper".into(), resources);
        let batch: Batch = [Part::new("x")].into_iter().collect();
        let out = proc.process_batch(batch).await.unwrap();
        let mut part = out[0].get(0).unwrap().clone();
        assert_eq!(part.bytes().unwrap().as_ref(), b"X");
    }

    #[tokio::test]
    async fn unknown_label_fails_the_batch() {
        let mut proc = ResourceProcessor::new("missing".into(), Arc::new(Resources::new()));
        let batch: Batch = [Part::new("x")].into_iter().collect();
        assert!(matches!(
            proc.process_batch(batch).await,
            Err(Error::UnknownComponent { .. })
        ));
    }
}
