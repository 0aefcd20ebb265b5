//! Configuration: document shape, parsing, and linting.

pub mod lint;
pub mod parser;
pub mod types;

pub use lint::lint;
pub use parser::{parse_stream, parse_stream_str, substitute_env_vars};
pub use types::{ComponentConfig, PipelineSection, StreamConfig};

use std::time::Duration;

use weir_types::Error;

/// Parse a human duration such as `"100ms"`, `"2s"`, `"5m"`, or `"1h"`.
///
/// # Errors
///
/// Returns [`Error::Config`] on anything else.
pub fn parse_duration(input: &str) -> Result<Duration, Error> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::Config(format!("duration '{input}' is missing a unit")))?;
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration '{input}'")))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(Error::Config(format!(
            "unknown duration unit '{other}' in '{input}'"
        ))),
    }
}

/// Parse a human byte size such as `"512"`, `"64KB"`, `"10MB"`, or
/// `"1GB"` (case-insensitive).
///
/// # Errors
///
/// Returns [`Error::Config`] on anything else.
pub fn parse_byte_size(input: &str) -> Result<usize, Error> {
    let s = input.trim().to_ascii_lowercase();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: usize = digits
        .parse()
        .map_err(|_| Error::Config(format!("invalid byte size '{input}'")))?;
    let multiplier = match unit.trim() {
        "" | "b" => 1,
        "kb" => 1024,
        "mb" => 1024 * 1024,
        "gb" => 1024 * 1024 * 1024,
        other => {
            return Err(Error::Config(format!(
                "unknown byte size unit '{other}' in '{input}'"
            )));
        }
    };
    Ok(value * multiplier)
}
