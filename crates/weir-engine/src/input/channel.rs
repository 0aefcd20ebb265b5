//! In-process channel input.
//!
//! Lets a host program (or a test) feed batches straight into a stream.
//! Every response observed downstream is reported back on the ack stream
//! in source order.

use async_trait::async_trait;
use tokio::sync::mpsc;

use weir_sdk::{ack_fn, Acker, Input};
use weir_types::{Batch, Error};

use crate::transaction::Response;

/// Producer handle for feeding a [`ChannelInput`].
pub type BatchSender = mpsc::Sender<Batch>;

/// Stream of responses, one per fed batch.
pub type AckReceiver = mpsc::UnboundedReceiver<Response>;

pub struct ChannelInput {
    rx: mpsc::Receiver<Batch>,
    acks: mpsc::UnboundedSender<Response>,
}

impl ChannelInput {
    /// Create the input plus its producer and ack-stream handles.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, BatchSender, AckReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        (Self { rx, acks: ack_tx }, tx, ack_rx)
    }
}

#[async_trait]
impl Input for ChannelInput {
    async fn connect(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn read_batch(&mut self) -> Result<(Batch, Acker), Error> {
        let Some(batch) = self.rx.recv().await else {
            return Err(Error::TypeClosed);
        };
        let acks = self.acks.clone();
        Ok((
            batch,
            ack_fn(move |res| async move {
                let _ = acks.send(res);
                Ok(())
            }),
        ))
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.rx.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_types::Part;

    #[tokio::test]
    async fn feeds_batches_and_reports_acks() {
        let (mut input, feed, mut acks) = ChannelInput::new(4);
        feed.send([Part::new("x")].into_iter().collect())
            .await
            .unwrap();

        let (batch, acker) = input.read_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        acker(Err(Error::Timeout)).await.unwrap();
        assert_eq!(acks.recv().await, Some(Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn dropped_producer_closes_the_input() {
        let (mut input, feed, _acks) = ChannelInput::new(4);
        drop(feed);
        assert!(matches!(input.read_batch().await, Err(Error::TypeClosed)));
    }
}
