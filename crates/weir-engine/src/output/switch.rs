//! Switch output: route batches by predicate.
//!
//! Cases are evaluated top-down against the batch's first part. A case
//! without a check always matches (the default). A matching case with
//! `continue` keeps evaluating further cases, so one batch can fan out to
//! several children; the acknowledgement is then the AND of the matched
//! children's acks. A batch matching no case is nacked.

use tokio::sync::mpsc;

use weir_types::Error;

use super::OutputChain;
use crate::interpolate::Expression;
use crate::transaction::{collect_responses, Transaction};

/// One routing case.
pub struct SwitchCase {
    /// Predicate; rendered value `"true"` matches. `None` always matches.
    pub check: Option<Expression>,
    /// Keep evaluating later cases after a match.
    pub continue_after: bool,
    /// Destination chain.
    pub output: OutputChain,
}

/// Spawn the switch over its cases.
#[must_use]
pub fn spawn(cases: Vec<SwitchCase>) -> OutputChain {
    let (tx, rx) = mpsc::channel(1);
    let mut handles = Vec::new();
    let mut routes = Vec::with_capacity(cases.len());
    for case in cases {
        let (child_tx, child_handles) = case.output.into_parts();
        routes.push((case.check, case.continue_after, child_tx));
        handles.extend(child_handles);
    }
    handles.push(tokio::spawn(switch_loop(rx, routes)));
    OutputChain::from_parts(tx, handles)
}

type Route = (Option<Expression>, bool, mpsc::Sender<Transaction>);

async fn switch_loop(mut rx: mpsc::Receiver<Transaction>, routes: Vec<Route>) {
    while let Some(mut txn) = rx.recv().await {
        let mut batch = txn.take_batch();

        let mut matched = Vec::new();
        let mut route_err = None;
        for (check, continue_after, sender) in &routes {
            let hit = match check {
                None => true,
                Some(expr) => match expr.eval(&mut batch, 0) {
                    Ok(rendered) => rendered == "true",
                    Err(err) => {
                        route_err = Some(err);
                        break;
                    }
                },
            };
            if hit {
                matched.push(sender);
                if !continue_after {
                    break;
                }
            }
        }

        if let Some(err) = route_err {
            txn.nack(err);
            continue;
        }
        if matched.is_empty() {
            txn.nack(Error::Processing(
                "no switch output case matched message".into(),
            ));
            continue;
        }

        let mut responses = Vec::with_capacity(matched.len());
        for sender in matched {
            let (child_txn, response) = Transaction::new(batch.shallow_copy());
            if sender.send(child_txn).await.is_err() {
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
