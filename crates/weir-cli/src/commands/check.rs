use std::path::Path;

use anyhow::{Context, Result};

use weir_engine::config::{lint, parser};
use weir_engine::Environment;

/// Parse and lint one stream config.
pub fn execute(path: &Path) -> Result<()> {
    let config = parser::parse_stream(path)?;
    let env = Environment::with_defaults();
    lint(&config, &env)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("{} failed its lint pass", path.display()))?;
    println!("{}: OK", path.display());
    Ok(())
}
