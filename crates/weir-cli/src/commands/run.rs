use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use weir_engine::config::parser;
use weir_engine::metrics::TracingMetrics;
use weir_engine::{Environment, Resources, Stream};

/// Run one stream to completion or until SIGINT.
pub async fn execute(path: &Path) -> Result<()> {
    let config = parser::parse_stream(path)?;
    let env = Environment::with_defaults();

    let label = path
        .file_stem()
        .map_or_else(|| "stream".to_string(), |s| s.to_string_lossy().into_owned());

    let stream = Stream::start(
        label,
        &config,
        &env,
        Arc::new(Resources::new()),
        Arc::new(TracingMetrics),
    )
    .await
    .map_err(|e| anyhow::anyhow!("{e}"))
    .with_context(|| format!("Failed to start stream from {}", path.display()))?;

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, draining");
            signal_token.cancel();
        }
    });

    if stream.run(token).await {
        Ok(())
    } else {
        anyhow::bail!("stream missed its drain deadline and was force-closed");
    }
}
