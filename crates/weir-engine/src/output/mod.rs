//! Output chains: driving a [`BatchOutput`] component from the
//! transaction fabric.
//!
//! A chain consumes transactions from its channel, writes each batch to
//! the component, and delivers the write result to the transaction's
//! sink. Up to `max_in_flight` writes run concurrently, so responses may
//! complete out of order relative to receipt; wrap with a serial broker
//! when ordering matters. Shutdown is channel-close driven: once every
//! sender is dropped the chain drains in-flight writes and closes the
//! component.

pub mod broker;
pub mod channel;
pub mod file;
pub mod resource;
pub mod retry;
pub mod switch;

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use weir_sdk::BatchOutput;
use weir_types::Error;

use crate::error::default_backoff;
use crate::input::join_all;
use crate::metrics::MetricsHandle;
use crate::transaction::Transaction;

/// A running output stage: the producer face is a transaction sender.
pub struct OutputChain {
    pub(crate) tx: mpsc::Sender<Transaction>,
    handles: Vec<JoinHandle<()>>,
}

impl OutputChain {
    /// Spawn a chain around a single component.
    #[must_use]
    pub fn spawn(label: String, output: Box<dyn BatchOutput>, metrics: MetricsHandle) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let output: Arc<dyn BatchOutput> = Arc::from(output);
        let handle = tokio::spawn(drive_output(label, output, rx, metrics));
        Self {
            tx,
            handles: vec![handle],
        }
    }

    /// A sender for feeding transactions into this chain.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<Transaction> {
        self.tx.clone()
    }

    /// Send one transaction (primarily for tests and embedding).
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeClosed`] when the chain has shut down.
    pub async fn send(&self, txn: Transaction) -> Result<(), Error> {
        self.tx.send(txn).await.map_err(|_| Error::TypeClosed)
    }

    /// Drop the producer face and wait for the drain, aborting stragglers
    /// at `deadline`. Returns `false` if a task had to be aborted.
    pub async fn close(self, deadline: std::time::Duration) -> bool {
        drop(self.tx);
        join_all(self.handles, deadline).await
    }

    #[must_use]
    pub(crate) fn into_parts(self) -> (mpsc::Sender<Transaction>, Vec<JoinHandle<()>>) {
        (self.tx, self.handles)
    }

    pub(crate) fn from_parts(
        tx: mpsc::Sender<Transaction>,
        handles: Vec<JoinHandle<()>>,
    ) -> Self {
        Self { tx, handles }
    }
}

async fn drive_output(
    label: String,
    output: Arc<dyn BatchOutput>,
    mut rx: mpsc::Receiver<Transaction>,
    metrics: MetricsHandle,
) {
    // Connect before the first write, buffering at most one transaction
    // that arrives while the connection is still coming up.
    let mut pending: Option<Transaction> = None;
    let mut upstream_open = true;
    let mut attempt: u32 = 0;
    loop {
        tokio::select! {
            txn = rx.recv(), if pending.is_none() && upstream_open => {
                match txn {
                    Some(txn) => pending = Some(txn),
                    None => upstream_open = false,
                }
            }
            res = output.connect() => match res {
                Ok(()) => {
                    tracing::info!(output = %label, "output connected");
                    break;
                }
                Err(Error::TypeClosed | Error::Cancelled) => {
                    close_output(&label, output.as_ref()).await;
                    return;
                }
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    let delay = default_backoff(attempt);
                    tracing::warn!(
                        output = %label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "output connect failed: {err}"
                    );
                    if !upstream_open && pending.is_none() {
                        close_output(&label, output.as_ref()).await;
                        return;
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    let max_in_flight = output.max_in_flight().max(1);
    if max_in_flight == 1 {
        // Serial fast path: write inline, responses in receipt order.
        if let Some(txn) = pending.take() {
            write_one(&label, output.as_ref(), txn, &metrics).await;
        }
        while let Some(txn) = rx.recv().await {
            write_one(&label, output.as_ref(), txn, &metrics).await;
        }
    } else {
        let semaphore = Arc::new(Semaphore::new(max_in_flight));
        let mut writes: JoinSet<()> = JoinSet::new();
        if let Some(txn) = pending.take() {
            dispatch(&label, &output, txn, &semaphore, &mut writes, &metrics).await;
        }
        while let Some(txn) = rx.recv().await {
            dispatch(&label, &output, txn, &semaphore, &mut writes, &metrics).await;
        }
        while writes.join_next().await.is_some() {}
    }

    close_output(&label, output.as_ref()).await;
}

async fn dispatch(
    label: &str,
    output: &Arc<dyn BatchOutput>,
    txn: Transaction,
    semaphore: &Arc<Semaphore>,
    writes: &mut JoinSet<()>,
    metrics: &MetricsHandle,
) {
    let Ok(permit) = semaphore.clone().acquire_owned().await else {
        txn.nack(Error::TypeClosed);
        return;
    };
    let label = label.to_string();
    let output = output.clone();
    let metrics = metrics.clone();
    writes.spawn(async move {
        write_one(&label, output.as_ref(), txn, &metrics).await;
        drop(permit);
    });
    // Reap completed writes so the set does not grow unbounded.
    while writes.try_join_next().is_some() {}
}

/// Write one batch and respond. A `NotConnected` result reconnects with
/// backoff and re-writes the same batch: the transaction does not advance
/// while the transport is down.
async fn write_one(
    label: &str,
    output: &dyn BatchOutput,
    mut txn: Transaction,
    metrics: &MetricsHandle,
) {
    let batch = txn.take_batch();
    let mut attempt: u32 = 0;
    loop {
        match output.write_batch(batch.shallow_copy()).await {
            Ok(()) => {
                metrics.counter("output_sent", 1);
                txn.ack();
                return;
            }
            Err(Error::NotConnected) => {
                attempt = attempt.saturating_add(1);
                let delay = default_backoff(attempt);
                tracing::warn!(
                    output = %label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "output lost its connection, reconnecting"
                );
                tokio::time::sleep(delay).await;
                if let Err(err) = output.connect().await {
                    tracing::warn!(output = %label, "output reconnect failed: {err}");
                }
            }
            Err(err) => {
                metrics.counter("output_error", 1);
                tracing::debug!(output = %label, "write failed: {err}");
                txn.nack(err);
                return;
            }
        }
    }
}

async fn close_output(label: &str, output: &dyn BatchOutput) {
    if let Err(err) = output.close().await {
        tracing::warn!(output = %label, "output close failed: {err}");
    }
}
