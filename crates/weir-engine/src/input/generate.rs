//! Generate input: synthesize messages from an interpolated mapping.
//!
//! Useful for seeding pipelines and load tests. This source has no
//! offsets to redeliver; a nack is logged and the message is gone.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use weir_sdk::{ack_fn, Acker, Input};
use weir_types::{Batch, Error, Part};

use crate::config::parse_duration;
use crate::interpolate::Expression;

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateConfig {
    /// Payload template, evaluated once per message.
    pub mapping: String,
    /// Messages to produce; `0` means unbounded.
    #[serde(default)]
    pub count: usize,
    /// Pause between messages, e.g. `"50ms"`. Omit for full speed.
    #[serde(default)]
    pub interval: Option<String>,
    /// Parts per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    1
}

pub struct Generate {
    mapping: Expression,
    remaining: Option<usize>,
    interval: Option<Duration>,
    batch_size: usize,
}

impl Generate {
    /// Build from config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on a bad mapping or interval.
    pub fn new(conf: &GenerateConfig) -> Result<Self, Error> {
        let interval = conf
            .interval
            .as_deref()
            .map(parse_duration)
            .transpose()?;
        if conf.batch_size == 0 {
            return Err(Error::Config("generate batch_size must be at least 1".into()));
        }
        Ok(Self {
            mapping: Expression::parse(&conf.mapping)?,
            remaining: (conf.count > 0).then_some(conf.count),
            interval,
            batch_size: conf.batch_size,
        })
    }
}

#[async_trait]
impl Input for Generate {
    async fn connect(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn read_batch(&mut self) -> Result<(Batch, Acker), Error> {
        if self.remaining == Some(0) {
            return Err(Error::TypeClosed);
        }
        if let Some(interval) = self.interval {
            tokio::time::sleep(interval).await;
        }

        let mut batch = Batch::new();
        for _ in 0..self.batch_size {
            if self.remaining == Some(0) {
                break;
            }
            let mut part = Part::new("");
            let payload = self.mapping.eval_part(&mut part)?;
            part.set_bytes(payload);
            batch.push(part);
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
        }
        Ok((
            batch,
            ack_fn(|res| async move {
                if let Err(err) = res {
                    tracing::warn!("generated message dropped after nack: {err}");
                }
                Ok(())
            }),
        ))
    }

    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(mapping: &str, count: usize) -> GenerateConfig {
        GenerateConfig {
            mapping: mapping.to_string(),
            count,
            interval: None,
            batch_size: 1,
        }
    }

    async fn drain(input: &mut Generate) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            match input.read_batch().await {
                Ok((batch, acker)) => {
                    for mut part in batch {
                        out.push(String::from_utf8(part.bytes().unwrap().to_vec()).unwrap());
                    }
                    acker(Ok(())).await.unwrap();
                }
                Err(Error::TypeClosed) => break,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        out
    }

    #[tokio::test]
    async fn produces_count_messages() {
        let mut input = Generate::new(&conf("hello world ${! count(\"n\") }", 3)).unwrap();
        input.connect().await.unwrap();
        assert_eq!(
            drain(&mut input).await,
            vec!["hello world 1", "hello world 2", "hello world 3"]
        );
    }

    #[tokio::test]
    async fn batch_size_groups_parts() {
        let mut input = Generate::new(&GenerateConfig {
            mapping: "m${! count(\"n\") }".into(),
            count: 4,
            interval: None,
            batch_size: 2,
        })
        .unwrap();
        let (batch, acker) = input.read_batch().await.unwrap();
        assert_eq!(batch.len(), 2);
        acker(Ok(())).await.unwrap();
        let (batch, acker) = input.read_batch().await.unwrap();
        assert_eq!(batch.len(), 2);
        acker(Ok(())).await.unwrap();
        assert!(matches!(
            input.read_batch().await,
            Err(Error::TypeClosed)
        ));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut c = conf("x", 1);
        c.batch_size = 0;
        assert!(matches!(Generate::new(&c), Err(Error::Config(_))));
    }
}
