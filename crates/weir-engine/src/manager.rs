//! Stream manager: supervises many named streams.
//!
//! `update` is a replace: the new graph is built and started before the
//! old one stops, and a failed build leaves the old stream running.
//! After `stop` every further operation fails with
//! [`Error::TypeClosed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use weir_types::Error;

use crate::config::StreamConfig;
use crate::environment::Environment;
use crate::error::EngineError;
use crate::metrics::MetricsHandle;
use crate::resources::Resources;
use crate::stream::{Stream, StreamState};

/// A point-in-time view of one managed stream.
#[derive(Debug, Clone)]
pub struct StreamStatus {
    pub label: String,
    pub state: StreamState,
}

struct StreamHandle {
    token: CancellationToken,
    state: Arc<RwLock<StreamState>>,
    runner: JoinHandle<bool>,
    config: StreamConfig,
}

impl StreamHandle {
    /// Cancel and drain within `timeout`; force-close past it. Returns
    /// `false` when the stream had to be force-closed.
    async fn shut_down(self, timeout: Duration) -> bool {
        self.token.cancel();
        match tokio::time::timeout(timeout, self.runner).await {
            Ok(Ok(clean)) => clean,
            Ok(Err(err)) => {
                tracing::error!("stream runner failed: {err}");
                false
            }
            Err(_) => {
                tracing::warn!("stream missed the manager deadline, force-closing");
                false
            }
        }
    }
}

/// Registry and supervisor of named streams.
pub struct StreamManager {
    env: Environment,
    metrics: MetricsHandle,
    resources: Arc<Resources>,
    streams: RwLock<HashMap<String, StreamHandle>>,
    closed: AtomicBool,
}

impl StreamManager {
    #[must_use]
    pub fn new(env: Environment, metrics: MetricsHandle) -> Self {
        Self {
            env,
            metrics,
            resources: Arc::new(Resources::new()),
            streams: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// The resource table shared by every stream under this manager.
    #[must_use]
    pub fn resources(&self) -> Arc<Resources> {
        self.resources.clone()
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TypeClosed);
        }
        Ok(())
    }

    /// Build and start a new stream under `label`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLabel`] for a taken label,
    /// [`Error::TypeClosed`] after `stop`, or the build failure.
    pub async fn create(&self, label: &str, config: &StreamConfig) -> Result<(), EngineError> {
        self.ensure_open()?;
        let mut streams = self.streams.write().await;
        if streams.contains_key(label) {
            return Err(Error::DuplicateLabel {
                kind: "stream",
                label: label.to_string(),
            }
            .into());
        }
        let stream = Stream::start(
            label,
            config,
            &self.env,
            self.resources.clone(),
            self.metrics.clone(),
        )
        .await?;
        streams.insert(label.to_string(), spawn_runner(stream, config.clone()));
        Ok(())
    }

    /// The config snapshot a stream was last started with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] for an unknown label or
    /// [`Error::TypeClosed`] after `stop`.
    pub async fn read_config(&self, label: &str) -> Result<StreamConfig, Error> {
        self.ensure_open()?;
        let streams = self.streams.read().await;
        let handle = streams.get(label).ok_or_else(|| Error::UnknownComponent {
            kind: "stream",
            name: label.to_string(),
        })?;
        Ok(handle.config.clone())
    }

    /// Report the state of one stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] for an unknown label or
    /// [`Error::TypeClosed`] after `stop`.
    pub async fn read(&self, label: &str) -> Result<StreamStatus, Error> {
        self.ensure_open()?;
        let streams = self.streams.read().await;
        let handle = streams.get(label).ok_or_else(|| Error::UnknownComponent {
            kind: "stream",
            name: label.to_string(),
        })?;
        let status = StreamStatus {
            label: label.to_string(),
            state: *handle.state.read().await,
        };
        Ok(status)
    }

    /// All managed streams and their states.
    pub async fn streams(&self) -> Vec<StreamStatus> {
        let streams = self.streams.read().await;
        let mut out = Vec::with_capacity(streams.len());
        for (label, handle) in streams.iter() {
            out.push(StreamStatus {
                label: label.clone(),
                state: *handle.state.read().await,
            });
        }
        out.sort_by(|a, b| a.label.cmp(&b.label));
        out
    }

    /// Replace a stream's graph. The new graph starts first; if it fails
    /// to start, the old stream keeps running and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] for an unknown label,
    /// [`Error::TypeClosed`] after `stop`, or the build failure.
    pub async fn update(
        &self,
        label: &str,
        config: &StreamConfig,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let mut streams = self.streams.write().await;
        if !streams.contains_key(label) {
            return Err(Error::UnknownComponent {
                kind: "stream",
                name: label.to_string(),
            }
            .into());
        }

        let replacement = Stream::start_replacing(
            label,
            config,
            &self.env,
            self.resources.clone(),
            self.metrics.clone(),
        )
        .await?;

        if let Some(old) = streams.remove(label) {
            if !old.shut_down(timeout).await {
                tracing::warn!(stream = %label, "previous graph did not drain cleanly");
            }
        }
        streams.insert(label.to_string(), spawn_runner(replacement, config.clone()));
        Ok(())
    }

    /// Stop and remove one stream, draining within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] for an unknown label or
    /// [`Error::TypeClosed`] after `stop`.
    pub async fn delete(&self, label: &str, timeout: Duration) -> Result<(), EngineError> {
        self.ensure_open()?;
        let handle = {
            let mut streams = self.streams.write().await;
            streams.remove(label).ok_or_else(|| Error::UnknownComponent {
                kind: "stream",
                name: label.to_string(),
            })?
        };
        handle.shut_down(timeout).await;
        Ok(())
    }

    /// Stop every stream and close the manager. Returns `false` when any
    /// stream had to be force-closed.
    pub async fn stop(&self, timeout: Duration) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return true;
        }
        let handles: Vec<(String, StreamHandle)> =
            self.streams.write().await.drain().collect();
        let mut clean = true;
        for (label, handle) in handles {
            tracing::info!(stream = %label, "stopping stream");
            clean &= handle.shut_down(timeout).await;
        }
        clean
    }
}

fn spawn_runner(stream: Stream, config: StreamConfig) -> StreamHandle {
    let token = CancellationToken::new();
    let state = stream.state_handle();
    let runner = tokio::spawn(stream.run(token.clone()));
    StreamHandle {
        token,
        state,
        runner,
        config,
    }
}
