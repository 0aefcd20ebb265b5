//! Pipeline engine: N parallel workers applying a processor chain.
//!
//! Workers draw from one inbound transaction channel (load-balanced by
//! channel receive) and feed one downstream channel. Every batch a worker
//! produces becomes its own downstream transaction; the inbound
//! transaction is answered once all of them resolve, with the first
//! error winning. There is no ordering across workers; configure one
//! worker (or a serial output) where ordering matters. A processor error
//! fails only the batch that hit it.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use weir_sdk::Processor;
use weir_types::Error;

use crate::input::join_all;
use crate::metrics::MetricsHandle;
use crate::processor::{close_chain, run_chain};
use crate::transaction::{collect_responses, Transaction};

/// Builds one processor chain instance per worker.
pub type ChainFactory =
    Box<dyn Fn() -> Result<Vec<Box<dyn Processor>>, Error> + Send + Sync>;

/// A running pipeline stage.
pub struct PipelineChain {
    handles: Vec<JoinHandle<()>>,
}

impl PipelineChain {
    /// Spawn `workers` workers between `rx` and `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for zero workers, or the first chain
    /// construction failure.
    pub fn spawn(
        workers: usize,
        factory: &ChainFactory,
        rx: mpsc::Receiver<Transaction>,
        tx: mpsc::Sender<Transaction>,
        metrics: MetricsHandle,
    ) -> Result<Self, Error> {
        if workers == 0 {
            return Err(Error::Config("pipeline needs at least one worker".into()));
        }
        // Build every chain up front so a bad config fails startup
        // instead of a worker.
        let mut chains = Vec::with_capacity(workers);
        for _ in 0..workers {
            chains.push(factory()?);
        }

        let shared_rx = Arc::new(Mutex::new(rx));
        let handles = chains
            .into_iter()
            .map(|chain| {
                tokio::spawn(worker_loop(
                    chain,
                    shared_rx.clone(),
                    tx.clone(),
                    metrics.clone(),
                ))
            })
            .collect();
        Ok(Self { handles })
    }

    /// Wait for every worker, aborting stragglers at `deadline`.
    /// Returns `false` if a worker had to be aborted.
    pub async fn join(self, deadline: std::time::Duration) -> bool {
        join_all(self.handles, deadline).await
    }

    /// The raw worker handles, for callers that supervise stages
    /// collectively.
    #[must_use]
    pub fn into_handles(self) -> Vec<JoinHandle<()>> {
        self.handles
    }
}

async fn worker_loop(
    mut chain: Vec<Box<dyn Processor>>,
    rx: Arc<Mutex<mpsc::Receiver<Transaction>>>,
    tx: mpsc::Sender<Transaction>,
    metrics: MetricsHandle,
) {
    loop {
        // The lock is held only while waiting; processing runs unlocked
        // so other workers drain the channel meanwhile.
        let txn = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(mut txn) = txn else { break };
        metrics.counter("pipeline_received", 1);

        let batch = txn.take_batch();
        match run_chain(&mut chain, batch).await {
            Err(err) => {
                metrics.counter("pipeline_error", 1);
                tracing::debug!("processor chain failed a batch: {err}");
                txn.nack(err);
            }
            Ok(batches) if batches.is_empty() => {
                metrics.counter("pipeline_dropped", 1);
                txn.ack();
            }
            Ok(batches) => {
                let mut responses = Vec::with_capacity(batches.len());
                for batch in batches {
                    let (derived, response) = Transaction::new(batch);
                    if tx.send(derived).await.is_err() {
                        responses.push({
                            let (t, r) = Transaction::new(weir_types::Batch::new());
                            t.nack(Error::TypeClosed);
                            r
                        });
                        continue;
                    }
                    responses.push(response);
                }
                txn.respond(collect_responses(responses).await);
            }
        }
    }

    if let Err(err) = close_chain(&mut chain).await {
        tracing::warn!("processor close failed: {err}");
    }
}
