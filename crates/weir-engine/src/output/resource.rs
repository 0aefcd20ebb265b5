//! Output referenced by label through the resource manager.

use std::sync::Arc;

use async_trait::async_trait;

use weir_sdk::BatchOutput;
use weir_types::{Batch, Error};

use crate::resources::Resources;

pub struct ResourceOutput {
    label: String,
    resources: Arc<Resources>,
}

impl ResourceOutput {
    #[must_use]
    pub fn new(label: String, resources: Arc<Resources>) -> Self {
        Self { label, resources }
    }
}

#[async_trait]
impl BatchOutput for ResourceOutput {
    async fn connect(&self) -> Result<(), Error> {
        let guard = self.resources.access_output(&self.label).await?;
        guard.connect().await
    }

    async fn write_batch(&self, batch: Batch) -> Result<(), Error> {
        let guard = self.resources.access_output(&self.label).await?;
        guard.write_batch(batch).await
    }

    async fn close(&self) -> Result<(), Error> {
        // The underlying instance belongs to the resource manager.
        Ok(())
    }
}
