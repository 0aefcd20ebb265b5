//! The stream runtime: one wired (input → buffer → pipeline → output)
//! graph.
//!
//! Startup order is outputs first, then the pipeline, then the buffer,
//! with inputs last, so no transaction is produced before its consumer
//! is ready. Shutdown runs in reverse, driven by cancellation on the input
//! side and channel-close cascade below it: inputs stop producing,
//! remaining transactions drain through pipeline and output, then each
//! stage closes. A missed drain deadline force-closes and logs the leak.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use weir_types::Error;

use crate::batcher::{self, BatchPolicy};
use crate::buffer::{BufferChain, MemoryBufferConfig};
use crate::config::{lint, ComponentConfig, StreamConfig};
use crate::environment::{BuildContext, Environment};
use crate::error::EngineError;
use crate::input::{broker as input_broker, InputChain};
use crate::interpolate::Expression;
use crate::metrics::MetricsHandle;
use crate::output::{broker as output_broker, retry, switch, OutputChain};
use crate::pipeline::{ChainFactory, PipelineChain};
use crate::resources::Resources;
use crate::transaction::Transaction;

/// Lifecycle state of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A built, running stream graph.
pub struct Stream {
    label: String,
    state: Arc<RwLock<StreamState>>,
    input_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl Stream {
    /// Lint, build, and start a stream graph.
    ///
    /// Stages start sink-to-source; when a later stage fails to build,
    /// the already-started stages are closed in reverse before the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Component`] with [`Error::Config`] for lint
    /// and construction failures.
    pub async fn start(
        label: impl Into<String>,
        config: &StreamConfig,
        env: &Environment,
        resources: Arc<Resources>,
        metrics: MetricsHandle,
    ) -> Result<Self, EngineError> {
        Self::start_with(label, config, env, resources, metrics, false).await
    }

    /// As [`Stream::start`], but declared resources replace any existing
    /// instance with the same label instead of colliding. Used by config
    /// updates: in-flight accesses keep the previous instance until they
    /// release their borrow.
    ///
    /// # Errors
    ///
    /// As [`Stream::start`].
    pub async fn start_replacing(
        label: impl Into<String>,
        config: &StreamConfig,
        env: &Environment,
        resources: Arc<Resources>,
        metrics: MetricsHandle,
    ) -> Result<Self, EngineError> {
        Self::start_with(label, config, env, resources, metrics, true).await
    }

    async fn start_with(
        label: impl Into<String>,
        config: &StreamConfig,
        env: &Environment,
        resources: Arc<Resources>,
        metrics: MetricsHandle,
        upsert_resources: bool,
    ) -> Result<Self, EngineError> {
        let label = label.into();
        lint(config, env)?;
        let shutdown_timeout =
            crate::config::parse_duration(&config.shutdown_timeout).map_err(EngineError::from)?;

        apply_resources(config, env, &resources, &metrics, upsert_resources).await?;

        let state = Arc::new(RwLock::new(StreamState::Starting));
        tracing::info!(stream = %label, "starting stream");

        // Outputs first.
        let output = build_output_chain(&config.output, env, &resources, &metrics)?;
        let (output_tx, output_handles) = output.into_parts();

        // Pipeline next, feeding the output.
        let factory = chain_factory(
            config.pipeline.processors.clone(),
            env.clone(),
            resources.clone(),
            metrics.clone(),
        );
        let (pipeline_tx, pipeline_rx) = mpsc::channel(1);
        let pipeline = match PipelineChain::spawn(
            config.pipeline.threads,
            &factory,
            pipeline_rx,
            output_tx,
            metrics.clone(),
        ) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                rollback(Vec::new(), output_handles, shutdown_timeout).await;
                return Err(err.into());
            }
        };

        // Optional buffer between input side and pipeline.
        let buffer_result = match &config.buffer {
            Some(buffer) if buffer.type_name == "memory" => {
                serde_json::from_value::<MemoryBufferConfig>(buffer.config.clone())
                    .map_err(|e| Error::Config(format!("buffer.memory: {e}")))
                    .and_then(|conf| {
                        let (buffer_tx, buffer_rx) = mpsc::channel(1);
                        BufferChain::spawn_memory(&conf, buffer_rx, pipeline_tx, metrics.clone())
                            .map(|chain| (buffer_tx, chain.into_handles()))
                    })
            }
            _ => Ok((pipeline_tx, Vec::new())),
        };
        let (ingest_tx, buffer_handles) = match buffer_result {
            Ok(wired) => wired,
            Err(err) => {
                let mut started = pipeline.into_handles();
                started.extend(output_handles);
                rollback(Vec::new(), started, shutdown_timeout).await;
                return Err(err.into());
            }
        };

        // Inputs last.
        let input = match build_input_chain(&config.input, env, &resources, &metrics) {
            Ok(chain) => chain,
            Err(err) => {
                drop(ingest_tx);
                let mut started = buffer_handles;
                started.extend(pipeline.into_handles());
                started.extend(output_handles);
                rollback(Vec::new(), started, shutdown_timeout).await;
                return Err(err.into());
            }
        };
        let (mut input_rx, input_handle) = input.into_parts();
        let (input_token, mut handles) = input_handle.into_parts();
        handles.push(tokio::spawn(async move {
            while let Some(txn) = input_rx.recv().await {
                if ingest_tx.send(txn).await.is_err() {
                    break;
                }
            }
        }));
        handles.extend(buffer_handles);
        handles.extend(pipeline.into_handles());
        handles.extend(output_handles);

        *state.write().await = StreamState::Running;
        tracing::info!(stream = %label, "stream running");

        Ok(Self {
            label,
            state,
            input_token,
            handles,
            shutdown_timeout,
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Shared handle on the stream's lifecycle state.
    #[must_use]
    pub fn state_handle(&self) -> Arc<RwLock<StreamState>> {
        self.state.clone()
    }

    /// Run until the graph finishes naturally (finite input) or `token`
    /// requests shutdown; then drain within the configured budget.
    /// Returns `false` if the drain deadline was missed and tasks were
    /// force-closed.
    pub async fn run(self, token: CancellationToken) -> bool {
        let Self {
            label,
            state,
            input_token,
            handles,
            shutdown_timeout,
        } = self;

        let aborts: Vec<_> = handles
            .iter()
            .map(tokio::task::JoinHandle::abort_handle)
            .collect();
        let joined = futures::future::join_all(handles);
        tokio::pin!(joined);

        let natural = tokio::select! {
            () = token.cancelled() => false,
            _ = &mut joined => true,
        };

        let mut clean = true;
        if natural {
            tracing::info!(stream = %label, "stream finished");
        } else {
            *state.write().await = StreamState::Stopping;
            tracing::info!(stream = %label, "stopping stream");
            input_token.cancel();
            if tokio::time::timeout(shutdown_timeout, &mut joined)
                .await
                .is_err()
            {
                tracing::warn!(
                    stream = %label,
                    timeout_ms = shutdown_timeout.as_millis() as u64,
                    "stream missed its drain deadline, force-closing"
                );
                for abort in aborts {
                    abort.abort();
                }
                clean = false;
            }
        }
        *state.write().await = if clean {
            StreamState::Stopped
        } else {
            StreamState::Failed
        };
        clean
    }
}

async fn rollback(
    tokens: Vec<CancellationToken>,
    handles: Vec<JoinHandle<()>>,
    deadline: Duration,
) {
    for token in tokens {
        token.cancel();
    }
    let _ = crate::input::join_all(handles, deadline).await;
}

/// Register (or on `upsert`, replace) every declared resource.
async fn apply_resources(
    config: &StreamConfig,
    env: &Environment,
    resources: &Arc<Resources>,
    metrics: &MetricsHandle,
    upsert: bool,
) -> Result<(), Error> {
    let ctx = BuildContext {
        resources,
        environment: env,
        metrics,
    };

    for conf in &config.cache_resources {
        let label = require_label(conf, "cache_resources")?;
        let cache = env.build_cache(&conf.type_name, &conf.config, &ctx)?;
        if upsert && resources.probe_cache(label).await {
            resources.replace_cache(label, cache).await?;
        } else {
            resources.register_cache(label, cache).await?;
        }
    }
    for conf in &config.rate_limit_resources {
        let label = require_label(conf, "rate_limit_resources")?;
        let limit = env.build_rate_limit(&conf.type_name, &conf.config, &ctx)?;
        if upsert && resources.probe_rate_limit(label).await {
            resources.replace_rate_limit(label, limit).await?;
        } else {
            resources.register_rate_limit(label, limit).await?;
        }
    }
    for conf in &config.processor_resources {
        let label = require_label(conf, "processor_resources")?;
        let processor = env.build_processor(&conf.type_name, &conf.config, &ctx)?;
        if upsert && resources.probe_processor(label).await {
            resources.replace_processor(label, processor).await?;
        } else {
            resources.register_processor(label, processor).await?;
        }
    }
    for conf in &config.input_resources {
        let label = require_label(conf, "input_resources")?;
        let input = env.build_input(&conf.type_name, &conf.config, &ctx)?;
        if upsert && resources.probe_input(label).await {
            resources.replace_input(label, input).await?;
        } else {
            resources.register_input(label, input).await?;
        }
    }
    for conf in &config.output_resources {
        let label = require_label(conf, "output_resources")?;
        let output = env.build_output(&conf.type_name, &conf.config, &ctx)?;
        if upsert && resources.probe_output(label).await {
            resources.replace_output(label, output).await?;
        } else {
            resources.register_output(label, output).await?;
        }
    }
    Ok(())
}

fn require_label<'a>(conf: &'a ComponentConfig, section: &str) -> Result<&'a str, Error> {
    conf.label
        .as_deref()
        .ok_or_else(|| Error::Config(format!("{section}: resources must carry a label")))
}

fn chain_factory(
    processors: Vec<ComponentConfig>,
    env: Environment,
    resources: Arc<Resources>,
    metrics: MetricsHandle,
) -> ChainFactory {
    Box::new(move || {
        let ctx = BuildContext {
            resources: &resources,
            environment: &env,
            metrics: &metrics,
        };
        processors
            .iter()
            .map(|p| env.build_processor(&p.type_name, &p.config, &ctx))
            .collect()
    })
}

/// Build an input chain, recursing through `broker` wrappers.
pub(crate) fn build_input_chain(
    conf: &ComponentConfig,
    env: &Environment,
    resources: &Arc<Resources>,
    metrics: &MetricsHandle,
) -> Result<InputChain, Error> {
    let label = display_label(conf);
    if conf.type_name == "broker" {
        #[derive(Deserialize)]
        struct BrokerInputConfig {
            #[serde(default = "one")]
            copies: usize,
            inputs: Vec<ComponentConfig>,
        }
        fn one() -> usize {
            1
        }
        let broker: BrokerInputConfig = serde_json::from_value(conf.config.clone())
            .map_err(|e| Error::Config(format!("input broker: {e}")))?;
        let mut children = Vec::with_capacity(broker.copies * broker.inputs.len());
        for _ in 0..broker.copies.max(1) {
            for child in &broker.inputs {
                children.push(build_input_chain(child, env, resources, metrics)?);
            }
        }
        return Ok(input_broker::fan_in(children));
    }

    let ctx = BuildContext {
        resources,
        environment: env,
        metrics,
    };
    let component = env.build_input(&conf.type_name, &conf.config, &ctx)?;
    Ok(InputChain::spawn(label, component, metrics.clone()))
}

/// Build an output chain, recursing through `broker`, `retry`, and
/// `switch` wrappers and honouring an attached batching policy.
pub(crate) fn build_output_chain(
    conf: &ComponentConfig,
    env: &Environment,
    resources: &Arc<Resources>,
    metrics: &MetricsHandle,
) -> Result<OutputChain, Error> {
    let label = display_label(conf);
    let chain = match conf.type_name.as_str() {
        "broker" => {
            let pattern: output_broker::Pattern = conf
                .config
                .get("pattern")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| Error::Config(format!("output broker pattern: {e}")))?
                .ok_or_else(|| Error::Config("output broker is missing its pattern".into()))?;
            let children = conf
                .children("outputs")?
                .iter()
                .map(|child| build_output_chain(child, env, resources, metrics))
                .collect::<Result<Vec<_>, _>>()?;
            output_broker::spawn(pattern, children)
        }
        "retry" => {
            let retry_conf: retry::RetryConfig = serde_json::from_value(conf.config.clone())
                .map_err(|e| Error::Config(format!("retry output: {e}")))?;
            let policy = retry::RetryPolicy::from_config(&retry_conf)?;
            let child = build_output_chain(&conf.child("output")?, env, resources, metrics)?;
            retry::spawn(policy, child)
        }
        "switch" => {
            #[derive(Deserialize)]
            struct SwitchCaseConfig {
                #[serde(default)]
                check: Option<String>,
                #[serde(default, rename = "continue")]
                continue_after: bool,
                output: ComponentConfig,
            }
            let cases: Vec<SwitchCaseConfig> = conf
                .config
                .get("cases")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| Error::Config(format!("switch output cases: {e}")))?
                .ok_or_else(|| Error::Config("switch output is missing its cases".into()))?;
            let mut built = Vec::with_capacity(cases.len());
            for case in cases {
                built.push(switch::SwitchCase {
                    check: case.check.as_deref().map(Expression::parse).transpose()?,
                    continue_after: case.continue_after,
                    output: build_output_chain(&case.output, env, resources, metrics)?,
                });
            }
            switch::spawn(built)
        }
        name => {
            let ctx = BuildContext {
                resources,
                environment: env,
                metrics,
            };
            let component = env.build_output(name, &conf.config, &ctx)?;
            OutputChain::spawn(label, component, metrics.clone())
        }
    };

    match &conf.batching {
        Some(batching) => {
            let policy = BatchPolicy::from_config(batching)?;
            if policy.is_noop() {
                return Ok(chain);
            }
            let (inner_tx, mut handles) = chain.into_parts();
            let (tx, rx) = mpsc::channel::<Transaction>(1);
            handles.push(batcher::spawn(policy, rx, inner_tx, metrics.clone()));
            Ok(OutputChain::from_parts(tx, handles))
        }
        None => Ok(chain),
    }
}

fn display_label(conf: &ComponentConfig) -> String {
    conf.label.clone().unwrap_or_else(|| conf.type_name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_stream_str;
    use crate::metrics;

    fn expect_err<T, E>(r: Result<T, E>) -> E {
        match r {
            Ok(_) => panic!("expected Err"),
            Err(e) => e,
        }
    }

    async fn run_config(yaml: &str) -> bool {
        let config = parse_stream_str(yaml).expect("config parses");
        let env = Environment::with_defaults();
        let stream = Stream::start(
            "test",
            &config,
            &env,
            Arc::new(Resources::new()),
            metrics::noop(),
        )
        .await
        .expect("stream starts");
        stream.run(CancellationToken::new()).await
    }

    #[tokio::test]
    async fn finite_generate_to_drop_finishes() {
        assert!(
            run_config(
                r#"
input:
  generate:
    mapping: msg ${! count("n") }
    count: 5
output:
  drop: {}
"#
            )
            .await
        );
    }

    #[tokio::test]
    async fn lint_failure_blocks_startup() {
        let config = parse_stream_str(
            r#"
input:
  carrier_pigeon: {}
output:
  drop: {}
"#,
        )
        .unwrap();
        let env = Environment::with_defaults();
        let err = expect_err(
            Stream::start(
                "bad",
                &config,
                &env,
                Arc::new(Resources::new()),
                metrics::noop(),
            )
            .await,
        );
        assert!(matches!(
            err.as_component(),
            Some(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_an_infinite_stream() {
        let config = parse_stream_str(
            r#"
input:
  generate:
    mapping: forever
    interval: 10ms
output:
  drop: {}
shutdown_timeout: 2s
"#,
        )
        .unwrap();
        let env = Environment::with_defaults();
        let stream = Stream::start(
            "infinite",
            &config,
            &env,
            Arc::new(Resources::new()),
            metrics::noop(),
        )
        .await
        .unwrap();
        let state = stream.state_handle();
        assert_eq!(*state.read().await, StreamState::Running);

        let token = CancellationToken::new();
        let runner = tokio::spawn(stream.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        assert!(runner.await.unwrap());
        assert_eq!(*state.read().await, StreamState::Stopped);
    }

    #[tokio::test]
    async fn memory_buffer_stream_drains() {
        assert!(
            run_config(
                r#"
input:
  generate:
    mapping: buffered ${! count("n") }
    count: 20
buffer:
  memory:
    limit: 1MB
pipeline:
  threads: 2
  processors:
    - mapping: root = content().uppercase()
output:
  drop: {}
"#
            )
            .await
        );
    }
}
