//! Retry wrapper: re-deliver a failed batch with backoff.
//!
//! Wraps one child chain. On a child error the same batch is re-sent
//! after a backoff pause, up to `max_attempts` total writes. The stream
//! pauses while a batch retries, preserving order. Terminal errors
//! (`TypeClosed`, `Cancelled`) are never retried.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;

use weir_types::Error;

use super::OutputChain;
use crate::config::parse_duration;
use crate::error::compute_backoff;
use crate::transaction::Transaction;

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total write attempts per batch; `0` retries until a terminal
    /// error.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// First backoff interval, e.g. `"100ms"`.
    #[serde(default = "default_period")]
    pub backoff: String,
    /// Backoff ceiling, e.g. `"5s"`.
    #[serde(default = "default_cap")]
    pub max_backoff: String,
}

fn default_max_attempts() -> usize {
    3
}

fn default_period() -> String {
    "100ms".to_string()
}

fn default_cap() -> String {
    "5s".to_string()
}

/// Resolved retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    /// Parse from config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed durations.
    pub fn from_config(conf: &RetryConfig) -> Result<Self, Error> {
        Ok(Self {
            max_attempts: conf.max_attempts,
            base: parse_duration(&conf.backoff)?,
            cap: parse_duration(&conf.max_backoff)?,
        })
    }
}

/// Spawn the wrapper around a child chain.
#[must_use]
pub fn spawn(policy: RetryPolicy, child: OutputChain) -> OutputChain {
    let (tx, rx) = mpsc::channel(1);
    let (child_tx, mut handles) = child.into_parts();
    handles.push(tokio::spawn(retry_loop(policy, rx, child_tx)));
    OutputChain::from_parts(tx, handles)
}

async fn retry_loop(
    policy: RetryPolicy,
    mut rx: mpsc::Receiver<Transaction>,
    child: mpsc::Sender<Transaction>,
) {
    while let Some(mut txn) = rx.recv().await {
        let batch = txn.take_batch();
        let mut attempt: u32 = 0;
        let result = loop {
            attempt += 1;
            let (child_txn, response) = Transaction::new(batch.shallow_copy());
            if child.send(child_txn).await.is_err() {
                break Err(Error::TypeClosed);
            }
            match response.wait().await {
                Ok(()) => break Ok(()),
                Err(err) if err.is_terminal() => break Err(err),
                Err(err) => {
                    if policy.max_attempts > 0 && attempt as usize >= policy.max_attempts {
                        tracing::warn!(
                            attempts = attempt,
                            "retries exhausted, surfacing error: {err}"
                        );
                        break Err(err);
                    }
                    let delay = compute_backoff(attempt, policy.base, policy.cap);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "write failed, retrying: {err}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };
        txn.respond(result);
    }
}
