//! Cache processor: run a cache operation per part.
//!
//! References a cache resource by label. Failures are annotated on the
//! part's failure flag: an `add` against an existing key flags only that
//! part, the rest of the batch proceeds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use weir_sdk::Processor;
use weir_types::{Batch, Error, Part};

use crate::config::parse_duration;
use crate::interpolate::Expression;
use crate::resources::Resources;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOperator {
    Get,
    Set,
    Add,
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheProcessorConfig {
    /// Label of the cache resource to operate on.
    pub resource: String,
    pub operator: CacheOperator,
    /// Interpolated key.
    pub key: String,
    /// Interpolated value for `set`/`add`; defaults to the part content.
    #[serde(default)]
    pub value: Option<String>,
    /// TTL for stored values, e.g. `"60s"`.
    #[serde(default)]
    pub ttl: Option<String>,
}

pub struct CacheProcessor {
    resource: String,
    operator: CacheOperator,
    key: Expression,
    value: Option<Expression>,
    ttl: Option<Duration>,
    resources: Arc<Resources>,
}

impl CacheProcessor {
    /// Build from config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed expressions or TTL.
    pub fn new(conf: &CacheProcessorConfig, resources: Arc<Resources>) -> Result<Self, Error> {
        Ok(Self {
            resource: conf.resource.clone(),
            operator: conf.operator,
            key: Expression::parse(&conf.key)?,
            value: conf
                .value
                .as_deref()
                .map(Expression::parse)
                .transpose()?,
            ttl: conf.ttl.as_deref().map(parse_duration).transpose()?,
            resources,
        })
    }

    async fn apply(&self, part: &mut Part) -> Result<(), Error> {
        let key = self.key.eval_part(part)?;
        let cache = self.resources.access_cache(&self.resource).await?;
        match self.operator {
            CacheOperator::Get => {
                let value = cache.get(&key).await?;
                part.set_bytes(value);
            }
            CacheOperator::Set => {
                let value = self.value_bytes(part)?;
                cache.set(&key, &value, self.ttl).await?;
            }
            CacheOperator::Add => {
                let value = self.value_bytes(part)?;
                cache.add(&key, &value, self.ttl).await?;
            }
            CacheOperator::Delete => {
                cache.delete(&key).await?;
            }
        }
        Ok(())
    }

    fn value_bytes(&self, part: &mut Part) -> Result<Vec<u8>, Error> {
        match &self.value {
            Some(expr) => Ok(expr.eval_part(part)?.into_bytes()),
            None => Ok(part.as_bytes()?.to_vec()),
        }
    }
}

#[async_trait]
impl Processor for CacheProcessor {
    async fn process_batch(&mut self, batch: Batch) -> Result<Vec<Batch>, Error> {
        let mut out = Batch::new();
        for mut part in batch {
            if let Err(err) = self.apply(&mut part).await {
                tracing::debug!(resource = %self.resource, "cache operation failed: {err}");
                part.set_failed(err.to_string());
            }
            out.push(part);
        }
        Ok(vec![out])
    }

    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
