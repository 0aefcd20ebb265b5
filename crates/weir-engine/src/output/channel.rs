//! In-process outputs: `channel`, `drop`, and `reject`.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use weir_sdk::BatchOutput;
use weir_types::{Batch, Error};

/// Hands every written batch to an in-process consumer. The write is
/// acknowledged once the consumer's channel accepted the batch.
pub struct ChannelOutput {
    tx: mpsc::Sender<Batch>,
}

impl ChannelOutput {
    /// Create the output plus the consumer handle.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Batch>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Wrap an existing sender, e.g. one captured by a test-registered
    /// constructor.
    #[must_use]
    pub fn from_sender(tx: mpsc::Sender<Batch>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl BatchOutput for ChannelOutput {
    async fn connect(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn write_batch(&self, batch: Batch) -> Result<(), Error> {
        self.tx.send(batch).await.map_err(|_| Error::TypeClosed)
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Acknowledges and discards everything.
#[derive(Debug, Default)]
pub struct DropOutput;

#[async_trait]
impl BatchOutput for DropOutput {
    async fn connect(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn write_batch(&self, _batch: Batch) -> Result<(), Error> {
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectConfig {
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    "message rejected".to_string()
}

/// Nacks everything with a configured reason. Useful as a `switch` or
/// `try` fallback branch.
#[derive(Debug)]
pub struct RejectOutput {
    reason: String,
}

impl RejectOutput {
    #[must_use]
    pub fn new(conf: &RejectConfig) -> Self {
        Self {
            reason: conf.reason.clone(),
        }
    }
}

#[async_trait]
impl BatchOutput for RejectOutput {
    async fn connect(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn write_batch(&self, _batch: Batch) -> Result<(), Error> {
        Err(Error::Processing(self.reason.clone()))
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_types::Part;

    fn batch() -> Batch {
        [Part::new("x")].into_iter().collect()
    }

    #[tokio::test]
    async fn channel_output_delivers() {
        let (out, mut rx) = ChannelOutput::new(1);
        out.write_batch(batch()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn channel_output_closed_consumer() {
        let (out, rx) = ChannelOutput::new(1);
        drop(rx);
        assert!(matches!(
            out.write_batch(batch()).await,
            Err(Error::TypeClosed)
        ));
    }

    #[tokio::test]
    async fn drop_output_acks() {
        let out = DropOutput;
        assert!(out.write_batch(batch()).await.is_ok());
    }

    #[tokio::test]
    async fn reject_output_nacks_with_reason() {
        let out = RejectOutput::new(&RejectConfig {
            reason: "not today".into(),
        });
        match out.write_batch(batch()).await {
            Err(Error::Processing(reason)) => assert_eq!(reason, "not today"),
            other => panic!("expected processing error, got {other:?}"),
        }
    }
}
