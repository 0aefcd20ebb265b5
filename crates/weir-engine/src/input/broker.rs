//! Input broker: fan-in over child input chains.
//!
//! Merges the transaction streams of N children (heterogeneous `inputs:`
//! list, or N `copies` of one child) onto a single channel. Each
//! transaction keeps its own response sink, so acknowledgements route
//! straight back to the producing child. The merged stream closes once
//! every child has closed.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::InputChain;

/// Merge child chains into one.
#[must_use]
pub fn fan_in(children: Vec<InputChain>) -> InputChain {
    let token = CancellationToken::new();
    let (tx, rx) = mpsc::channel(1);
    let mut handles = Vec::new();

    for child in children {
        let (mut child_rx, child_handle) = child.into_parts();
        let tx = tx.clone();
        let parent = token.clone();
        handles.push(tokio::spawn(async move {
            while let Some(txn) = child_rx.recv().await {
                if tx.send(txn).await.is_err() {
                    break;
                }
            }
        }));
        // Supervises one child: cascades a parent close, and ends by
        // itself when the child finishes naturally.
        handles.push(tokio::spawn(async move {
            let (child_token, child_handles) = child_handle.into_parts();
            let joined = futures::future::join_all(child_handles);
            tokio::pin!(joined);
            tokio::select! {
                () = parent.cancelled() => {
                    child_token.cancel();
                    let _ = (&mut joined).await;
                }
                _ = &mut joined => {}
            }
        }));
    }

    InputChain::from_parts(rx, token, handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use weir_sdk::{ack_fn, Acker, Input};
    use weir_types::{Batch, Error, Part};

    struct StaticInput {
        items: Vec<String>,
    }

    #[async_trait]
    impl Input for StaticInput {
        async fn connect(&mut self) -> Result<(), Error> {
            Ok(())
        }

        async fn read_batch(&mut self) -> Result<(Batch, Acker), Error> {
            if self.items.is_empty() {
                return Err(Error::TypeClosed);
            }
            let item = self.items.remove(0);
            let batch: Batch = [Part::new(item)].into_iter().collect();
            Ok((batch, ack_fn(|res| async move { res })))
        }

        async fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    fn chain_of(items: &[&str]) -> InputChain {
        InputChain::spawn(
            "static".into(),
            Box::new(StaticInput {
                items: items.iter().map(ToString::to_string).collect(),
            }),
            metrics::noop(),
        )
    }

    #[tokio::test]
    async fn merges_all_children_then_closes() {
        let mut merged = fan_in(vec![chain_of(&["a", "b"]), chain_of(&["c"])]);

        let mut seen = HashSet::new();
        while let Some(mut txn) = merged.recv().await {
            let payload = txn.take_batch().into_parts().remove(0).bytes().unwrap();
            seen.insert(String::from_utf8(payload.to_vec()).unwrap());
            txn.ack();
        }
        assert_eq!(
            seen,
            HashSet::from(["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }

    #[tokio::test]
    async fn close_cascades_to_children() {
        let merged = fan_in(vec![chain_of(&["a", "b", "c"]), chain_of(&["d"])]);
        merged.trigger_close();
        let (mut rx, handle) = merged.into_parts();
        while let Some(txn) = rx.recv().await {
            txn.ack();
        }
        assert!(handle.join(std::time::Duration::from_secs(1)).await);
    }
}
