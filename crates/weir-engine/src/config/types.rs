//! The stream configuration document shape.
//!
//! Every component is a tagged union: the single remaining key after the
//! optional `label` and `batching` fields names the component type, and
//! its value is the type-specific config. Constructors are resolved
//! against an [`Environment`](crate::environment::Environment) at build
//! time, so no type list is baked in here.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

use weir_types::Error;

use crate::batcher::BatchPolicyConfig;

/// One component entry: `{ label?, batching?, <type>: <config> }`.
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    pub label: Option<String>,
    pub type_name: String,
    pub config: serde_json::Value,
    /// Batching policy in front of an output component.
    pub batching: Option<BatchPolicyConfig>,
}

impl ComponentConfig {
    /// Convenience constructor for programmatic configs.
    #[must_use]
    pub fn of(type_name: &str, config: serde_json::Value) -> Self {
        Self {
            label: None,
            type_name: type_name.to_string(),
            config,
            batching: None,
        }
    }

    /// Deserialize a nested child component from `config[key]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the key is absent or malformed.
    pub fn child(&self, key: &str) -> Result<ComponentConfig, Error> {
        let value = self.config.get(key).ok_or_else(|| {
            Error::Config(format!("{}: missing field '{key}'", self.type_name))
        })?;
        serde_json::from_value(value.clone())
            .map_err(|e| Error::Config(format!("{}.{key}: {e}", self.type_name)))
    }

    /// Deserialize a list of nested child components from `config[key]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the key is absent or malformed.
    pub fn children(&self, key: &str) -> Result<Vec<ComponentConfig>, Error> {
        let value = self.config.get(key).ok_or_else(|| {
            Error::Config(format!("{}: missing field '{key}'", self.type_name))
        })?;
        serde_json::from_value(value.clone())
            .map_err(|e| Error::Config(format!("{}.{key}: {e}", self.type_name)))
    }
}

impl<'de> Deserialize<'de> for ComponentConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut map = serde_json::Map::deserialize(deserializer)?;

        let label = match map.remove("label") {
            None => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => {
                return Err(D::Error::custom(format!(
                    "component label must be a string, got {other}"
                )));
            }
        };
        let batching = map
            .remove("batching")
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| D::Error::custom(format!("batching: {e}")))?;

        let mut entries = map.into_iter();
        let Some((type_name, config)) = entries.next() else {
            return Err(D::Error::custom(
                "component config is missing its type key",
            ));
        };
        if let Some((extra, _)) = entries.next() {
            return Err(D::Error::custom(format!(
                "component config has conflicting type keys '{type_name}' and '{extra}'"
            )));
        }

        Ok(Self {
            label,
            type_name,
            config,
            batching,
        })
    }
}

/// The `pipeline` section: worker count plus the processor chain.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub processors: Vec<ComponentConfig>,
}

fn default_threads() -> usize {
    1
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            processors: Vec::new(),
        }
    }
}

/// One stream: input, optional buffer, pipeline, output, and shared
/// resources.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    pub input: ComponentConfig,
    #[serde(default)]
    pub buffer: Option<ComponentConfig>,
    #[serde(default)]
    pub pipeline: PipelineSection,
    pub output: ComponentConfig,
    #[serde(default)]
    pub input_resources: Vec<ComponentConfig>,
    #[serde(default)]
    pub output_resources: Vec<ComponentConfig>,
    #[serde(default)]
    pub processor_resources: Vec<ComponentConfig>,
    #[serde(default)]
    pub cache_resources: Vec<ComponentConfig>,
    #[serde(default)]
    pub rate_limit_resources: Vec<ComponentConfig>,
    /// Drain budget for shutdown, e.g. `"20s"`.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,
}

fn default_shutdown_timeout() -> String {
    "20s".to_string()
}
