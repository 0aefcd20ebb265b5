//! Input chains: driving an [`Input`] component onto the transaction
//! fabric.
//!
//! A chain owns its component on a dedicated task. It reconnects with
//! bounded exponential backoff, produces one [`Transaction`] per read in
//! source order, and invokes the component's acker with the downstream
//! response, so the source offset commits only after the batch was
//! durably handled (at-least-once).

pub mod broker;
pub mod channel;
pub mod file;
pub mod generate;
pub mod resource;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use weir_sdk::Input;
use weir_types::Error;

use crate::error::default_backoff;
use crate::metrics::MetricsHandle;
use crate::transaction::Transaction;

/// A running input stage: the consumer face is a transaction receiver.
pub struct InputChain {
    pub(crate) rx: mpsc::Receiver<Transaction>,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl InputChain {
    /// Spawn a chain around a single component.
    #[must_use]
    pub fn spawn(label: String, input: Box<dyn Input>, metrics: MetricsHandle) -> Self {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(drive_input(label, input, tx, token.clone(), metrics));
        Self {
            rx,
            token,
            handles: vec![handle],
        }
    }

    /// Receive the next transaction. `None` once the chain has closed.
    pub async fn recv(&mut self) -> Option<Transaction> {
        self.rx.recv().await
    }

    /// Signal the chain to stop producing. Reads already in flight finish
    /// and their transactions drain normally.
    pub fn trigger_close(&self) {
        self.token.cancel();
    }

    /// Wait for the chain's tasks to finish, aborting any that outlive
    /// `deadline`. Returns `false` if a task had to be aborted.
    pub async fn join(self, deadline: std::time::Duration) -> bool {
        join_all(self.handles, deadline).await
    }

    /// Split into the transaction receiver and a handle for shutdown.
    #[must_use]
    pub fn into_parts(self) -> (mpsc::Receiver<Transaction>, InputHandle) {
        (
            self.rx,
            InputHandle {
                token: self.token,
                handles: self.handles,
            },
        )
    }

    pub(crate) fn from_parts(
        rx: mpsc::Receiver<Transaction>,
        token: CancellationToken,
        handles: Vec<JoinHandle<()>>,
    ) -> Self {
        Self { rx, token, handles }
    }
}

/// Shutdown handle for a chain whose receiver has been wired downstream.
pub struct InputHandle {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl InputHandle {
    pub fn trigger_close(&self) {
        self.token.cancel();
    }

    /// Split into the close token and the raw task handles.
    #[must_use]
    pub fn into_parts(self) -> (CancellationToken, Vec<JoinHandle<()>>) {
        (self.token, self.handles)
    }

    /// Wait for the chain's tasks, aborting stragglers at `deadline`.
    /// Returns `false` if a task had to be aborted.
    pub async fn join(self, deadline: std::time::Duration) -> bool {
        join_all(self.handles, deadline).await
    }
}

pub(crate) async fn join_all(
    handles: Vec<JoinHandle<()>>,
    deadline: std::time::Duration,
) -> bool {
    let aborts: Vec<_> = handles.iter().map(tokio::task::JoinHandle::abort_handle).collect();
    let joined = tokio::time::timeout(deadline, futures::future::join_all(handles)).await;
    match joined {
        Ok(results) => {
            for res in results {
                if let Err(err) = res {
                    if err.is_panic() {
                        tracing::error!("stage task panicked: {err}");
                    }
                }
            }
            true
        }
        Err(_) => {
            tracing::warn!("stage tasks missed shutdown deadline, force-closing");
            for abort in aborts {
                abort.abort();
            }
            false
        }
    }
}

async fn drive_input(
    label: String,
    mut input: Box<dyn Input>,
    tx: mpsc::Sender<Transaction>,
    token: CancellationToken,
    metrics: MetricsHandle,
) {
    if !connect_with_backoff(&label, input.as_mut(), &token).await {
        close_input(&label, input.as_mut()).await;
        return;
    }

    loop {
        let read = tokio::select! {
            () = token.cancelled() => break,
            read = input.read_batch() => read,
        };
        match read {
            Ok((mut batch, acker)) => {
                for part in batch.iter_mut() {
                    part.set_span(tracing::info_span!("message", input = %label));
                }
                metrics.counter("input_received", 1);

                let (txn, response) = Transaction::new(batch);
                if tx.send(txn).await.is_err() {
                    // Consumer is gone; the source must not commit.
                    let _ = acker(Err(Error::TypeClosed)).await;
                    break;
                }
                let res = response.wait().await;
                match &res {
                    Ok(()) => metrics.counter("input_acked", 1),
                    Err(err) => {
                        metrics.counter("input_nacked", 1);
                        tracing::debug!(input = %label, "batch nacked: {err}");
                    }
                }
                if let Err(err) = acker(res).await {
                    tracing::warn!(input = %label, "source acknowledgement failed: {err}");
                }
            }
            Err(Error::TypeClosed) => {
                tracing::info!(input = %label, "input exhausted");
                break;
            }
            Err(Error::Cancelled) => break,
            Err(Error::NotConnected) => {
                tracing::warn!(input = %label, "input lost its connection");
                if !connect_with_backoff(&label, input.as_mut(), &token).await {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(input = %label, "read failed: {err}");
                metrics.counter("input_error", 1);
                if token
                    .run_until_cancelled(tokio::time::sleep(std::time::Duration::from_millis(100)))
                    .await
                    .is_none()
                {
                    break;
                }
            }
        }
    }

    close_input(&label, input.as_mut()).await;
}

/// Connect with bounded exponential backoff until success or
/// cancellation. Returns `false` when cancelled or terminally closed.
async fn connect_with_backoff(
    label: &str,
    input: &mut dyn Input,
    token: &CancellationToken,
) -> bool {
    let mut attempt: u32 = 0;
    loop {
        let res = tokio::select! {
            () = token.cancelled() => return false,
            res = input.connect() => res,
        };
        match res {
            Ok(()) => {
                tracing::info!(input = %label, "input connected");
                return true;
            }
            Err(Error::TypeClosed | Error::Cancelled) => return false,
            Err(err) => {
                attempt = attempt.saturating_add(1);
                let delay = default_backoff(attempt);
                tracing::warn!(
                    input = %label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "input connect failed: {err}"
                );
                if token
                    .run_until_cancelled(tokio::time::sleep(delay))
                    .await
                    .is_none()
                {
                    return false;
                }
            }
        }
    }
}

async fn close_input(label: &str, input: &mut dyn Input) {
    if let Err(err) = input.close().await {
        tracing::warn!(input = %label, "input close failed: {err}");
    }
}
