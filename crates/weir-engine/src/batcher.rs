//! Batching policy: accumulate parts and flush as one batch.
//!
//! Attached in front of any output. Triggers: part-count threshold,
//! byte-size threshold, time since the first queued part, or a per-part
//! interpolated predicate. The contributing transactions are answered
//! collectively from the aggregated flush result; a partial failure is
//! fanned back only to the contributors whose parts failed.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use weir_types::{Batch, BatchError, Error, Part};

use crate::config::{parse_byte_size, parse_duration};
use crate::interpolate::Expression;
use crate::metrics::MetricsHandle;
use crate::transaction::{Response, Transaction};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchPolicyConfig {
    /// Flush at this many parts (`0` disables).
    #[serde(default)]
    pub count: usize,
    /// Flush at this many payload bytes, e.g. `"1MB"` (`""` disables).
    #[serde(default)]
    pub byte_size: Option<String>,
    /// Flush this long after the first queued part, e.g. `"200ms"`.
    #[serde(default)]
    pub period: Option<String>,
    /// Per-part predicate; a part rendering `"true"` flushes the batch.
    #[serde(default)]
    pub check: Option<String>,
}

/// Resolved batching policy.
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    pub count: usize,
    pub byte_size: usize,
    pub period: Option<Duration>,
    check: Option<Expression>,
}

impl BatchPolicy {
    /// Parse from config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed sizes, durations, or
    /// predicates.
    pub fn from_config(conf: &BatchPolicyConfig) -> Result<Self, Error> {
        Ok(Self {
            count: conf.count,
            byte_size: conf
                .byte_size
                .as_deref()
                .map(parse_byte_size)
                .transpose()?
                .unwrap_or(0),
            period: conf.period.as_deref().map(parse_duration).transpose()?,
            check: conf.check.as_deref().map(Expression::parse).transpose()?,
        })
    }

    /// `true` when no trigger is configured and the wrapper should not be
    /// installed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.count == 0 && self.byte_size == 0 && self.period.is_none() && self.check.is_none()
    }
}

/// Spawn the accumulator between `rx` and the inner output's sender.
#[must_use]
pub fn spawn(
    policy: BatchPolicy,
    rx: mpsc::Receiver<Transaction>,
    inner: mpsc::Sender<Transaction>,
    metrics: MetricsHandle,
) -> JoinHandle<()> {
    tokio::spawn(batch_loop(policy, rx, inner, metrics))
}

struct Contributor {
    txn: Transaction,
    start: usize,
    len: usize,
}

struct Accumulator {
    parts: Vec<Part>,
    contributors: Vec<Contributor>,
    bytes: usize,
    deadline: Option<Instant>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            parts: Vec::new(),
            contributors: Vec::new(),
            bytes: 0,
            deadline: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.contributors.is_empty()
    }
}

async fn batch_loop(
    policy: BatchPolicy,
    mut rx: mpsc::Receiver<Transaction>,
    inner: mpsc::Sender<Transaction>,
    metrics: MetricsHandle,
) {
    let mut acc = Accumulator::new();
    loop {
        let txn = if let Some(deadline) = acc.deadline {
            tokio::select! {
                txn = rx.recv() => txn,
                () = tokio::time::sleep_until(deadline) => {
                    metrics.counter("batcher_period_flush", 1);
                    flush(&mut acc, &inner).await;
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        let Some(mut txn) = txn else {
            // Upstream closed: flush the tail and stop.
            flush(&mut acc, &inner).await;
            break;
        };

        let mut trigger = false;
        let batch = txn.take_batch();
        let start = acc.parts.len();
        let mut len = 0;
        for mut part in batch {
            acc.bytes += part.as_bytes().map(bytes::Bytes::len).unwrap_or(0);
            if let Some(check) = &policy.check {
                match check.eval_part(&mut part) {
                    Ok(rendered) => trigger |= rendered == "true",
                    Err(err) => {
                        tracing::debug!("batch predicate failed, ignoring: {err}");
                    }
                }
            }
            acc.parts.push(part);
            len += 1;
        }
        acc.contributors.push(Contributor { txn, start, len });
        if acc.deadline.is_none() {
            acc.deadline = policy.period.map(|p| Instant::now() + p);
        }

        trigger |= policy.count > 0 && acc.parts.len() >= policy.count;
        trigger |= policy.byte_size > 0 && acc.bytes >= policy.byte_size;
        if trigger {
            flush(&mut acc, &inner).await;
        }
    }
}

async fn flush(acc: &mut Accumulator, inner: &mpsc::Sender<Transaction>) {
    if acc.is_empty() {
        acc.deadline = None;
        return;
    }
    let state = std::mem::replace(acc, Accumulator::new());
    let batch: Batch = state.parts.into_iter().collect();
    let (derived, response) = Transaction::new(batch);
    let result: Response = if inner.send(derived).await.is_err() {
        Err(Error::TypeClosed)
    } else {
        response.wait().await
    };
    distribute(state.contributors, &result);
}

/// Fan the aggregate result back to each contributor. On a partial
/// failure every contributor sees only its own indices, re-based to its
/// original batch.
fn distribute(contributors: Vec<Contributor>, result: &Response) {
    match result {
        Ok(()) => {
            for c in contributors {
                c.txn.ack();
            }
        }
        Err(Error::BatchPartial(detail)) => {
            for c in contributors {
                let mut own = BatchError::new();
                for (index, reason) in detail.iter() {
                    if index >= c.start && index < c.start + c.len {
                        own.fail(index - c.start, reason);
                    }
                }
                if own.is_empty() {
                    c.txn.ack();
                } else {
                    c.txn.nack(Error::BatchPartial(own));
                }
            }
        }
        Err(err) => {
            for c in contributors {
                c.txn.nack(err.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics;
    use weir_types::Part;

    fn policy(conf: BatchPolicyConfig) -> BatchPolicy {
        BatchPolicy::from_config(&conf).unwrap()
    }

    fn part_txn(content: &str) -> (Transaction, crate::transaction::ResponseRx) {
        Transaction::new([Part::new(content.to_string())].into_iter().collect())
    }

    #[test]
    fn noop_detection() {
        assert!(policy(BatchPolicyConfig::default()).is_noop());
        assert!(!policy(BatchPolicyConfig {
            count: 2,
            ..BatchPolicyConfig::default()
        })
        .is_noop());
    }

    #[tokio::test]
    async fn count_trigger_groups_transactions() {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let _task = spawn(
            policy(BatchPolicyConfig {
                count: 2,
                ..BatchPolicyConfig::default()
            }),
            in_rx,
            out_tx,
            metrics::noop(),
        );

        let (t1, r1) = part_txn("a");
        let (t2, r2) = part_txn("b");
        in_tx.send(t1).await.unwrap();
        in_tx.send(t2).await.unwrap();

        let mut flushed = out_rx.recv().await.unwrap();
        assert_eq!(flushed.batch().len(), 2);
        let _ = flushed.take_batch();
        flushed.ack();

        assert_eq!(r1.wait().await, Ok(()));
        assert_eq!(r2.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn partial_failure_fans_back_per_contributor() {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let _task = spawn(
            policy(BatchPolicyConfig {
                count: 2,
                ..BatchPolicyConfig::default()
            }),
            in_rx,
            out_tx,
            metrics::noop(),
        );

        let (t1, r1) = part_txn("good");
        let (t2, r2) = part_txn("bad");
        in_tx.send(t1).await.unwrap();
        in_tx.send(t2).await.unwrap();

        let flushed = out_rx.recv().await.unwrap();
        let mut detail = BatchError::new();
        detail.fail(1, "rejected by sink");
        flushed.nack(Error::BatchPartial(detail));

        assert_eq!(r1.wait().await, Ok(()));
        match r2.wait().await {
            Err(Error::BatchPartial(own)) => {
                assert_eq!(own.failed(0), Some("rejected by sink"));
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn period_trigger_flushes_without_count() {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let _task = spawn(
            policy(BatchPolicyConfig {
                count: 100,
                period: Some("50ms".into()),
                ..BatchPolicyConfig::default()
            }),
            in_rx,
            out_tx,
            metrics::noop(),
        );

        let (t1, r1) = part_txn("slowpoke");
        in_tx.send(t1).await.unwrap();

        let flushed = out_rx.recv().await.unwrap();
        assert_eq!(flushed.batch().len(), 1);
        flushed.ack();
        assert_eq!(r1.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn check_trigger_flushes_on_predicate() {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let _task = spawn(
            policy(BatchPolicyConfig {
                check: Some("${! content().equals(\"flush\") }".into()),
                ..BatchPolicyConfig::default()
            }),
            in_rx,
            out_tx,
            metrics::noop(),
        );

        let (t1, r1) = part_txn("hold");
        let (t2, r2) = part_txn("flush");
        in_tx.send(t1).await.unwrap();
        in_tx.send(t2).await.unwrap();

        let flushed = out_rx.recv().await.unwrap();
        assert_eq!(flushed.batch().len(), 2);
        flushed.ack();
        assert_eq!(r1.wait().await, Ok(()));
        assert_eq!(r2.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn upstream_close_flushes_the_tail() {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let _task = spawn(
            policy(BatchPolicyConfig {
                count: 100,
                ..BatchPolicyConfig::default()
            }),
            in_rx,
            out_tx,
            metrics::noop(),
        );

        let (t1, r1) = part_txn("tail");
        in_tx.send(t1).await.unwrap();
        drop(in_tx);

        let flushed = out_rx.recv().await.unwrap();
        assert_eq!(flushed.batch().len(), 1);
        flushed.ack();
        assert_eq!(r1.wait().await, Ok(()));
    }
}
