//! Buffer stage between the input side and the pipeline.
//!
//! The default (`none`) is a direct hand-off: the stream wires the input
//! channel straight to the pipeline and the consumer's response reaches
//! the producer's transaction without copying. No task, no code here.
//!
//! The `memory` buffer is a bounded in-memory queue. The upstream
//! transaction is acknowledged on **enqueue**, which weakens
//! at-least-once from sink-durable to buffer-durable: batches queued at
//! a crash are gone. A downstream nack re-enqueues the batch at the
//! front for redelivery, which may reorder it relative to writes already
//! in flight.

use std::collections::VecDeque;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use weir_types::{Batch, Error};

use crate::config::parse_byte_size;
use crate::input::join_all;
use crate::metrics::MetricsHandle;
use crate::transaction::{Response, Transaction};

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryBufferConfig {
    /// Queue capacity in bytes, e.g. `"64MB"`.
    #[serde(default = "default_limit")]
    pub limit: String,
}

fn default_limit() -> String {
    "64MB".to_string()
}

/// A running buffer stage.
pub struct BufferChain {
    handles: Vec<JoinHandle<()>>,
}

impl BufferChain {
    /// Spawn a memory buffer between `rx` and `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on a malformed byte-size limit.
    pub fn spawn_memory(
        conf: &MemoryBufferConfig,
        rx: mpsc::Receiver<Transaction>,
        tx: mpsc::Sender<Transaction>,
        metrics: MetricsHandle,
    ) -> Result<Self, Error> {
        let limit = parse_byte_size(&conf.limit)?;
        let handle = tokio::spawn(buffer_loop(limit, rx, tx, metrics));
        Ok(Self {
            handles: vec![handle],
        })
    }

    /// Wait for the buffer to drain, aborting at `deadline`. Returns
    /// `false` if it had to be aborted.
    pub async fn join(self, deadline: std::time::Duration) -> bool {
        join_all(self.handles, deadline).await
    }

    /// The raw task handles, for callers that supervise stages
    /// collectively.
    #[must_use]
    pub fn into_handles(self) -> Vec<JoinHandle<()>> {
        self.handles
    }
}

struct Queued {
    batch: Batch,
    bytes: usize,
}

fn batch_bytes(batch: &mut Batch) -> usize {
    let mut total = 0;
    for part in batch.iter_mut() {
        total += part.as_bytes().map(bytes::Bytes::len).unwrap_or(0);
    }
    total
}

async fn buffer_loop(
    limit: usize,
    mut rx: mpsc::Receiver<Transaction>,
    tx: mpsc::Sender<Transaction>,
    metrics: MetricsHandle,
) {
    let mut queue: VecDeque<Queued> = VecDeque::new();
    let mut used: usize = 0;
    let mut upstream_open = true;
    let mut in_flight: FuturesUnordered<_> = FuturesUnordered::new();

    loop {
        if !upstream_open && queue.is_empty() && in_flight.is_empty() {
            break;
        }
        let has_space = used == 0 || used < limit;

        tokio::select! {
            txn = rx.recv(), if upstream_open && has_space => {
                match txn {
                    Some(mut txn) => {
                        let mut batch = txn.take_batch();
                        let size = batch_bytes(&mut batch);
                        used += size;
                        queue.push_back(Queued { batch, bytes: size });
                        metrics.gauge("buffer_backlog_bytes", used as i64);
                        // Buffer-durable: the source commits here.
                        txn.ack();
                    }
                    None => upstream_open = false,
                }
            }
            permit = tx.reserve(), if !queue.is_empty() => {
                let Ok(permit) = permit else {
                    tracing::warn!(
                        dropped = queue.len(),
                        "buffer consumer gone, dropping queued batches"
                    );
                    break;
                };
                let queued = queue.pop_front().expect("queue checked non-empty");
                let (derived, response) = Transaction::new(queued.batch.shallow_copy());
                permit.send(derived);
                in_flight.push(async move {
                    let res: Response = response.wait().await;
                    (queued, res)
                });
            }
            Some((queued, res)) = in_flight.next(), if !in_flight.is_empty() => {
                match res {
                    Ok(()) => {
                        used = used.saturating_sub(queued.bytes);
                        metrics.gauge("buffer_backlog_bytes", used as i64);
                    }
                    Err(err) => {
                        tracing::warn!("buffered batch nacked, redelivering: {err}");
                        metrics.counter("buffer_redelivered", 1);
                        queue.push_front(queued);
                    }
                }
            }
        }
    }
}
