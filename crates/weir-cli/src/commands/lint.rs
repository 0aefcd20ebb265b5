use std::path::{Path, PathBuf};

use anyhow::Result;

use weir_engine::config::{lint, parser};
use weir_engine::Environment;

/// Lint several stream configs, printing every violation before failing.
pub fn execute(paths: &[PathBuf]) -> Result<()> {
    if paths.is_empty() {
        anyhow::bail!("no config files given");
    }
    let env = Environment::with_defaults();
    let mut failures = 0usize;
    for path in paths {
        if let Err(err) = lint_one(path, &env) {
            eprintln!("{}: {err:#}", path.display());
            failures += 1;
        } else {
            println!("{}: OK", path.display());
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} of {} config(s) failed", paths.len());
    }
    Ok(())
}

fn lint_one(path: &Path, env: &Environment) -> Result<()> {
    let config = parser::parse_stream(path)?;
    lint(&config, env).map_err(|e| anyhow::anyhow!("{e}"))
}
