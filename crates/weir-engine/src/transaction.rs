//! The transaction primitive: a batch plus its one-shot response sink.
//!
//! Every batch travels the fabric inside a [`Transaction`]. The receiver
//! must deliver exactly one response; the one-shot sink makes more than
//! one impossible, and the drop guard makes fewer than one impossible: a
//! transaction dropped without a response reports [`Error::TypeClosed`]
//! so a dying component can never strand an acknowledgement.

use tokio::sync::oneshot;

use weir_types::{Batch, Error};

/// The value delivered to a transaction's response sink.
pub type Response = Result<(), Error>;

/// Receiving half of a response sink.
pub struct ResponseRx {
    rx: oneshot::Receiver<Response>,
}

impl ResponseRx {
    /// Wait for the response. A dropped sink counts as the owning
    /// component having shut down.
    pub async fn wait(self) -> Response {
        match self.rx.await {
            Ok(res) => res,
            Err(_) => Err(Error::TypeClosed),
        }
    }
}

/// One batch in flight with its response sink.
pub struct Transaction {
    batch: Batch,
    sink: Option<oneshot::Sender<Response>>,
}

impl Transaction {
    /// Create a transaction, returning the receiver its response arrives
    /// on.
    #[must_use]
    pub fn new(batch: Batch) -> (Self, ResponseRx) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                batch,
                sink: Some(tx),
            },
            ResponseRx { rx },
        )
    }

    #[must_use]
    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    /// Take the batch, leaving a sink-only shell that still guarantees a
    /// response on drop. Used by components that re-batch parts.
    pub fn take_batch(&mut self) -> Batch {
        std::mem::take(&mut self.batch)
    }

    /// Deliver a positive acknowledgement.
    pub fn ack(self) {
        self.respond(Ok(()));
    }

    /// Deliver a negative acknowledgement.
    pub fn nack(self, err: Error) {
        self.respond(Err(err));
    }

    /// Deliver the response. The receiver may have gone away (its chain
    /// already shut down); that is not an error here.
    pub fn respond(mut self, res: Response) {
        if let Some(sink) = self.sink.take() {
            let _ = sink.send(res);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            let _ = sink.send(Err(Error::TypeClosed));
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("parts", &self.batch.len())
            .field("responded", &self.sink.is_none())
            .finish()
    }
}

/// Await every receiver and reduce to a single response: the first error
/// in `receivers` order, or success when all succeeded.
pub async fn collect_responses(receivers: Vec<ResponseRx>) -> Response {
    let mut first_err = None;
    for rx in receivers {
        if let Err(err) = rx.wait().await {
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
    use weir_types::Part;

    fn batch_of(contents: &[&str]) -> Batch {
        contents.iter().map(|c| Part::new(c.to_string())).collect()
    }

    #[tokio::test]
    async fn ack_delivers_ok() {
        let (tx, rx) = Transaction::new(batch_of(&["a"]));
        tx.ack();
        assert_eq!(rx.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn nack_delivers_error() {
        let (tx, rx) = Transaction::new(batch_of(&["a"]));
        tx.nack(Error::Timeout);
        assert_eq!(rx.wait().await, Err(Error::Timeout));
    }

    #[tokio::test]
    async fn drop_without_response_reports_closed() {
        let (tx, rx) = Transaction::new(batch_of(&["a"]));
        drop(tx);
        assert_eq!(rx.wait().await, Err(Error::TypeClosed));
    }

    #[tokio::test]
    async fn respond_to_gone_receiver_is_fine() {
        let (tx, rx) = Transaction::new(batch_of(&["a"]));
        drop(rx);
        tx.ack();
    }

    #[tokio::test]
    async fn collect_reduces_to_first_error() {
        let (t1, r1) = Transaction::new(batch_of(&["a"]));
        let (t2, r2) = Transaction::new(batch_of(&["b"]));
        let (t3, r3) = Transaction::new(batch_of(&["c"]));
        t1.ack();
        t2.nack(Error::NotConnected);
        t3.nack(Error::Timeout);
        let res = collect_responses(vec![r1, r2, r3]).await;
        assert_eq!(res, Err(Error::NotConnected));
    }

    #[tokio::test]
    async fn collect_all_ok() {
        let (t1, r1) = Transaction::new(batch_of(&["a"]));
        let (t2, r2) = Transaction::new(batch_of(&["b"]));
        t1.ack();
        t2.ack();
        assert_eq!(collect_responses(vec![r1, r2]).await, Ok(()));
    }
}
