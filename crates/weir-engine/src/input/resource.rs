//! Input referenced by label through the resource manager.

use std::sync::Arc;

use async_trait::async_trait;

use weir_sdk::{Acker, Input};
use weir_types::{Batch, Error};

use crate::resources::Resources;

pub struct ResourceInput {
    label: String,
    resources: Arc<Resources>,
}

impl ResourceInput {
    #[must_use]
    pub fn new(label: String, resources: Arc<Resources>) -> Self {
        Self { label, resources }
    }
}

#[async_trait]
impl Input for ResourceInput {
    async fn connect(&mut self) -> Result<(), Error> {
        let mut guard = self.resources.access_input(&self.label).await?;
        guard.connect().await
    }

    async fn read_batch(&mut self) -> Result<(Batch, Acker), Error> {
        let mut guard = self.resources.access_input(&self.label).await?;
        guard.read_batch().await
    }

    async fn close(&mut self) -> Result<(), Error> {
        // The underlying instance belongs to the resource manager.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::channel::ChannelInput;
    use weir_types::Part;

    #[tokio::test]
    async fn reads_through_the_registry() {
        let resources = Arc::new(Resources::new());
        let (input, feed, _acks) = ChannelInput::new(2);
        resources
            .register_input("feed", Box::new(input))
            .await
            .unwrap();

        feed.send([Part::new("x")].into_iter().collect())
            .await
            .unwrap();

        let mut via = ResourceInput::new("feed".into(), resources);
        via.connect().await.unwrap();
        let (batch, acker) = via.read_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        acker(Ok(())).await.unwrap();
    }
}
