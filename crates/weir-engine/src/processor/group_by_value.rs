//! Group-by-value processor: split a batch into per-key batches.
//!
//! The key is an interpolated expression evaluated per part. Output
//! batches appear in first-seen-key order; parts keep their relative
//! order within a group. Each produced batch becomes its own downstream
//! transaction.

use async_trait::async_trait;
use serde::Deserialize;

use weir_sdk::Processor;
use weir_types::{Batch, Error};

use crate::interpolate::Expression;

#[derive(Debug, Clone, Deserialize)]
pub struct GroupByValueConfig {
    /// The interpolated string to group on.
    pub value: String,
}

pub struct GroupByValue {
    value: Expression,
}

impl GroupByValue {
    /// Build from config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on a malformed expression.
    pub fn new(conf: &GroupByValueConfig) -> Result<Self, Error> {
        Ok(Self {
            value: Expression::parse(&conf.value)?,
        })
    }
}

#[async_trait]
impl Processor for GroupByValue {
    async fn process_batch(&mut self, mut batch: Batch) -> Result<Vec<Batch>, Error> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::with_capacity(batch.len());
        for index in 0..batch.len() {
            keys.push(self.value.eval(&mut batch, index)?);
        }

        let mut order: Vec<String> = Vec::new();
        let mut groups: std::collections::HashMap<String, Batch> =
            std::collections::HashMap::new();
        for (key, part) in keys.into_iter().zip(batch.into_parts()) {
            let group = groups.entry(key.clone()).or_insert_with(|| {
                tracing::trace!(group = %key, "new group formed");
                order.push(key);
                Batch::new()
            });
            group.push(part);
        }

        Ok(order
            .into_iter()
            .filter_map(|key| groups.remove(&key))
            .collect())
    }

    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
