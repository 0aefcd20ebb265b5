//! Output broker patterns: fan-out, sequential fan-out, round-robin,
//! greedy.
//!
//! Brokers satisfy the same chain contract as a plain output and
//! therefore compose recursively. Fan-out acknowledges positively iff
//! **all** children acknowledged positively; retry responsibilities sit
//! with a surrounding `retry` wrapper.

use serde::Deserialize;
use tokio::sync::mpsc;

use weir_types::Error;

use super::OutputChain;
use crate::transaction::{collect_responses, Transaction};

/// Distribution pattern over broker children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// Every child receives every batch; parent ack = AND of child acks.
    FanOut,
    /// As `fan_out`, but each child is attempted only after the previous
    /// one succeeded.
    FanOutSequential,
    /// Each batch to exactly one child, by rotating index.
    RoundRobin,
    /// Each batch to the first child with free capacity.
    Greedy,
}

/// Spawn a broker over child chains.
#[must_use]
pub fn spawn(pattern: Pattern, children: Vec<OutputChain>) -> OutputChain {
    let (tx, rx) = mpsc::channel(1);
    let mut handles = Vec::new();
    let mut senders = Vec::with_capacity(children.len());
    for child in children {
        let (child_tx, child_handles) = child.into_parts();
        senders.push(child_tx);
        handles.extend(child_handles);
    }
    handles.push(tokio::spawn(broker_loop(pattern, rx, senders)));
    OutputChain::from_parts(tx, handles)
}

async fn broker_loop(
    pattern: Pattern,
    mut rx: mpsc::Receiver<Transaction>,
    senders: Vec<mpsc::Sender<Transaction>>,
) {
    let mut next_child = 0usize;
    while let Some(mut txn) = rx.recv().await {
        match pattern {
            Pattern::FanOut => {
                let batch = txn.take_batch();
                let mut responses = Vec::with_capacity(senders.len());
                for sender in &senders {
                    let (child_txn, response) = Transaction::new(batch.shallow_copy());
                    if sender.send(child_txn).await.is_err() {
                        responses.push(closed_response());
                        continue;
                    }
                    responses.push(response);
                }
                txn.respond(collect_responses(responses).await);
            }
            Pattern::FanOutSequential => {
                let batch = txn.take_batch();
                let mut result = Ok(());
                for sender in &senders {
                    let (child_txn, response) = Transaction::new(batch.shallow_copy());
                    if sender.send(child_txn).await.is_err() {
                        result = Err(Error::TypeClosed);
                        break;
                    }
                    if let Err(err) = response.wait().await {
                        result = Err(err);
                        break;
                    }
                }
                txn.respond(result);
            }
            Pattern::RoundRobin => {
                let sender = &senders[next_child % senders.len()];
                next_child = next_child.wrapping_add(1);
                // The transaction moves whole: the child's response routes
                // straight back to the parent's producer.
                if let Err(send_err) = sender.send(txn).await {
                    send_err.0.nack(Error::TypeClosed);
                }
            }
            Pattern::Greedy => {
                let mut permit = None;
                for sender in &senders {
                    if let Ok(free) = sender.try_reserve() {
                        permit = Some(free);
                        break;
                    }
                }
                let permit = match permit {
                    Some(p) => p,
                    None => {
                        let reservations: Vec<_> = senders
                            .iter()
                            .map(|s| Box::pin(s.reserve()))
                            .collect();
                        let (first, _, _) = futures::future::select_all(reservations).await;
                        match first {
                            Ok(p) => p,
                            Err(_) => {
                                txn.nack(Error::TypeClosed);
                                continue;
                            }
                        }
                    }
                };
                permit.send(txn);
            }
        }
    }
}

fn closed_response() -> crate::transaction::ResponseRx {
    let (txn, response) = Transaction::new(weir_types::Batch::new());
    txn.nack(Error::TypeClosed);
    response
}
