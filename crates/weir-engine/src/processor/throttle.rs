//! Rate-limit processor: gate batches on a shared rate-limit resource.
//!
//! Waits out whatever duration the resource demands before letting the
//! batch through, one access per batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use weir_sdk::Processor;
use weir_types::{Batch, Error};

use crate::resources::Resources;

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitProcessorConfig {
    /// Label of the rate-limit resource to gate on.
    pub resource: String,
}

pub struct RateLimitProcessor {
    resource: String,
    resources: Arc<Resources>,
}

impl RateLimitProcessor {
    #[must_use]
    pub fn new(conf: &RateLimitProcessorConfig, resources: Arc<Resources>) -> Self {
        Self {
            resource: conf.resource.clone(),
            resources,
        }
    }
}

#[async_trait]
impl Processor for RateLimitProcessor {
    async fn process_batch(&mut self, batch: Batch) -> Result<Vec<Batch>, Error> {
        loop {
            let wait = {
                let limit = self.resources.access_rate_limit(&self.resource).await?;
                limit.access().await?
            };
            if wait == Duration::ZERO {
                return Ok(vec![batch]);
            }
            tokio::time::sleep(wait).await;
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
