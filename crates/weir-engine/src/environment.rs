//! Component constructor registries.
//!
//! An [`Environment`] maps `kind + type-name` to a constructor. It is an
//! explicit value with no process-wide registry behind it, and cloning
//! one gives an isolated namespace, which is how tests register private
//! components without leaking them anywhere else.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use weir_sdk::{BatchOutput, Cache, Input, Processor, RateLimit};
use weir_types::Error;

use crate::metrics::MetricsHandle;
use crate::resources::Resources;

/// Everything a constructor may need besides its own config.
pub struct BuildContext<'a> {
    pub resources: &'a Arc<Resources>,
    pub environment: &'a Environment,
    pub metrics: &'a MetricsHandle,
}

pub type InputCtor =
    Arc<dyn Fn(&Value, &BuildContext<'_>) -> Result<Box<dyn Input>, Error> + Send + Sync>;
pub type OutputCtor =
    Arc<dyn Fn(&Value, &BuildContext<'_>) -> Result<Box<dyn BatchOutput>, Error> + Send + Sync>;
pub type ProcessorCtor =
    Arc<dyn Fn(&Value, &BuildContext<'_>) -> Result<Box<dyn Processor>, Error> + Send + Sync>;
pub type CacheCtor =
    Arc<dyn Fn(&Value, &BuildContext<'_>) -> Result<Box<dyn Cache>, Error> + Send + Sync>;
pub type RateLimitCtor =
    Arc<dyn Fn(&Value, &BuildContext<'_>) -> Result<Box<dyn RateLimit>, Error> + Send + Sync>;

/// A scoped namespace of component constructors.
#[derive(Clone, Default)]
pub struct Environment {
    inputs: HashMap<String, InputCtor>,
    outputs: HashMap<String, OutputCtor>,
    processors: HashMap<String, ProcessorCtor>,
    caches: HashMap<String, CacheCtor>,
    rate_limits: HashMap<String, RateLimitCtor>,
}

fn parse_conf<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, Error> {
    serde_json::from_value(value.clone()).map_err(|e| Error::Config(e.to_string()))
}

fn string_conf(value: &Value, what: &str) -> Result<String, Error> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(Error::Config(format!(
            "{what} expects a string, got {other}"
        ))),
    }
}

impl Environment {
    /// An empty namespace.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard namespace with every built-in registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut env = Self::empty();
        env.register_builtins();
        env
    }

    // ── Registration ────────────────────────────────────────────────

    /// Register an input constructor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLabel`] when the type name is taken.
    pub fn register_input(&mut self, name: &str, ctor: InputCtor) -> Result<(), Error> {
        if self.inputs.contains_key(name) {
            return Err(Error::DuplicateLabel {
                kind: "input type",
                label: name.to_string(),
            });
        }
        self.inputs.insert(name.to_string(), ctor);
        Ok(())
    }

    /// Register an output constructor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLabel`] when the type name is taken.
    pub fn register_output(&mut self, name: &str, ctor: OutputCtor) -> Result<(), Error> {
        if self.outputs.contains_key(name) {
            return Err(Error::DuplicateLabel {
                kind: "output type",
                label: name.to_string(),
            });
        }
        self.outputs.insert(name.to_string(), ctor);
        Ok(())
    }

    /// Register a processor constructor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLabel`] when the type name is taken.
    pub fn register_processor(&mut self, name: &str, ctor: ProcessorCtor) -> Result<(), Error> {
        if self.processors.contains_key(name) {
            return Err(Error::DuplicateLabel {
                kind: "processor type",
                label: name.to_string(),
            });
        }
        self.processors.insert(name.to_string(), ctor);
        Ok(())
    }

    /// Register a cache constructor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLabel`] when the type name is taken.
    pub fn register_cache(&mut self, name: &str, ctor: CacheCtor) -> Result<(), Error> {
        if self.caches.contains_key(name) {
            return Err(Error::DuplicateLabel {
                kind: "cache type",
                label: name.to_string(),
            });
        }
        self.caches.insert(name.to_string(), ctor);
        Ok(())
    }

    /// Register a rate-limit constructor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLabel`] when the type name is taken.
    pub fn register_rate_limit(&mut self, name: &str, ctor: RateLimitCtor) -> Result<(), Error> {
        if self.rate_limits.contains_key(name) {
            return Err(Error::DuplicateLabel {
                kind: "rate limit type",
                label: name.to_string(),
            });
        }
        self.rate_limits.insert(name.to_string(), ctor);
        Ok(())
    }

    // ── Lookup ──────────────────────────────────────────────────────

    #[must_use]
    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.contains_key(name)
    }

    #[must_use]
    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.contains_key(name)
    }

    #[must_use]
    pub fn has_processor(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    #[must_use]
    pub fn has_cache(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    #[must_use]
    pub fn has_rate_limit(&self, name: &str) -> bool {
        self.rate_limits.contains_key(name)
    }

    // ── Construction ────────────────────────────────────────────────

    /// Build an input component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] for an unregistered type or
    /// the constructor's own failure.
    pub fn build_input(
        &self,
        name: &str,
        conf: &Value,
        ctx: &BuildContext<'_>,
    ) -> Result<Box<dyn Input>, Error> {
        let ctor = self.inputs.get(name).ok_or_else(|| Error::UnknownComponent {
            kind: "input",
            name: name.to_string(),
        })?;
        ctor(conf, ctx)
    }

    /// Build an output component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] for an unregistered type or
    /// the constructor's own failure.
    pub fn build_output(
        &self,
        name: &str,
        conf: &Value,
        ctx: &BuildContext<'_>,
    ) -> Result<Box<dyn BatchOutput>, Error> {
        let ctor = self.outputs.get(name).ok_or_else(|| Error::UnknownComponent {
            kind: "output",
            name: name.to_string(),
        })?;
        ctor(conf, ctx)
    }

    /// Build a processor component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] for an unregistered type or
    /// the constructor's own failure.
    pub fn build_processor(
        &self,
        name: &str,
        conf: &Value,
        ctx: &BuildContext<'_>,
    ) -> Result<Box<dyn Processor>, Error> {
        let ctor = self
            .processors
            .get(name)
            .ok_or_else(|| Error::UnknownComponent {
                kind: "processor",
                name: name.to_string(),
            })?;
        ctor(conf, ctx)
    }

    /// Build a cache component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] for an unregistered type or
    /// the constructor's own failure.
    pub fn build_cache(
        &self,
        name: &str,
        conf: &Value,
        ctx: &BuildContext<'_>,
    ) -> Result<Box<dyn Cache>, Error> {
        let ctor = self.caches.get(name).ok_or_else(|| Error::UnknownComponent {
            kind: "cache",
            name: name.to_string(),
        })?;
        ctor(conf, ctx)
    }

    /// Build a rate-limit component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponent`] for an unregistered type or
    /// the constructor's own failure.
    pub fn build_rate_limit(
        &self,
        name: &str,
        conf: &Value,
        ctx: &BuildContext<'_>,
    ) -> Result<Box<dyn RateLimit>, Error> {
        let ctor = self
            .rate_limits
            .get(name)
            .ok_or_else(|| Error::UnknownComponent {
                kind: "rate limit",
                name: name.to_string(),
            })?;
        ctor(conf, ctx)
    }

    // ── Built-ins ───────────────────────────────────────────────────

    #[allow(clippy::too_many_lines)]
    fn register_builtins(&mut self) {
        use crate::input::file::{FileInput, FileInputConfig};
        use crate::input::generate::{Generate, GenerateConfig};
        use crate::input::resource::ResourceInput;
        use crate::output::channel::{DropOutput, RejectConfig, RejectOutput};
        use crate::output::file::{FileOutput, FileOutputConfig};
        use crate::output::resource::ResourceOutput;
        use crate::processor::cache_op::{CacheProcessor, CacheProcessorConfig};
        use crate::processor::control::{
            CatchProcessor, ProcessorCase, SwitchProcessor, TryProcessor,
        };
        use crate::processor::group_by_value::{GroupByValue, GroupByValueConfig};
        use crate::processor::mapping::MappingProcessor;
        use crate::processor::resource::ResourceProcessor;
        use crate::processor::throttle::{RateLimitProcessor, RateLimitProcessorConfig};

        // Registering into a fresh namespace cannot collide.
        let must = |res: Result<(), Error>| {
            if let Err(err) = res {
                tracing::error!("builtin registration collided: {err}");
            }
        };

        must(self.register_input(
            "generate",
            Arc::new(|conf, _ctx| {
                let conf: GenerateConfig = parse_conf(conf)?;
                Ok(Box::new(Generate::new(&conf)?) as Box<dyn Input>)
            }),
        ));
        must(self.register_input(
            "file",
            Arc::new(|conf, _ctx| {
                let conf: FileInputConfig = parse_conf(conf)?;
                Ok(Box::new(FileInput::new(&conf)?) as Box<dyn Input>)
            }),
        ));
        must(self.register_input(
            "resource",
            Arc::new(|conf, ctx| {
                let label = string_conf(conf, "input resource")?;
                Ok(Box::new(ResourceInput::new(label, ctx.resources.clone())) as Box<dyn Input>)
            }),
        ));

        must(self.register_output(
            "file",
            Arc::new(|conf, _ctx| {
                let conf: FileOutputConfig = parse_conf(conf)?;
                Ok(Box::new(FileOutput::new(&conf)) as Box<dyn BatchOutput>)
            }),
        ));
        must(self.register_output(
            "drop",
            Arc::new(|_conf, _ctx| Ok(Box::new(DropOutput) as Box<dyn BatchOutput>)),
        ));
        must(self.register_output(
            "reject",
            Arc::new(|conf, _ctx| {
                let conf: RejectConfig = parse_conf(conf)?;
                Ok(Box::new(RejectOutput::new(&conf)) as Box<dyn BatchOutput>)
            }),
        ));
        must(self.register_output(
            "resource",
            Arc::new(|conf, ctx| {
                let label = string_conf(conf, "output resource")?;
                Ok(Box::new(ResourceOutput::new(label, ctx.resources.clone()))
                    as Box<dyn BatchOutput>)
            }),
        ));

        must(self.register_processor(
            "mapping",
            Arc::new(|conf, _ctx| {
                let src = string_conf(conf, "mapping")?;
                Ok(Box::new(MappingProcessor::new(&src)?) as Box<dyn Processor>)
            }),
        ));
        must(self.register_processor(
            "group_by_value",
            Arc::new(|conf, _ctx| {
                let conf: GroupByValueConfig = parse_conf(conf)?;
                Ok(Box::new(GroupByValue::new(&conf)?) as Box<dyn Processor>)
            }),
        ));
        must(self.register_processor(
            "cache",
            Arc::new(|conf, ctx| {
                let conf: CacheProcessorConfig = parse_conf(conf)?;
                Ok(Box::new(CacheProcessor::new(&conf, ctx.resources.clone())?)
                    as Box<dyn Processor>)
            }),
        ));
        must(self.register_processor(
            "try",
            Arc::new(|conf, ctx| {
                let children = build_processor_list(conf, ctx)?;
                Ok(Box::new(TryProcessor::new(children)) as Box<dyn Processor>)
            }),
        ));
        must(self.register_processor(
            "catch",
            Arc::new(|conf, ctx| {
                let children = build_processor_list(conf, ctx)?;
                Ok(Box::new(CatchProcessor::new(children)) as Box<dyn Processor>)
            }),
        ));
        must(self.register_processor(
            "switch",
            Arc::new(|conf, ctx| {
                let cases: Vec<ProcessorCaseConfig> = parse_conf(conf)?;
                let mut built = Vec::with_capacity(cases.len());
                for case in cases {
                    let check = case
                        .check
                        .as_deref()
                        .map(crate::interpolate::Expression::parse)
                        .transpose()?;
                    let mut processors = Vec::with_capacity(case.processors.len());
                    for child in &case.processors {
                        processors.push(ctx.environment.build_processor(
                            &child.type_name,
                            &child.config,
                            ctx,
                        )?);
                    }
                    built.push(ProcessorCase { check, processors });
                }
                Ok(Box::new(SwitchProcessor::new(built)) as Box<dyn Processor>)
            }),
        ));
        must(self.register_processor(
            "resource",
            Arc::new(|conf, ctx| {
                let label = string_conf(conf, "processor resource")?;
                Ok(Box::new(ResourceProcessor::new(label, ctx.resources.clone()))
                    as Box<dyn Processor>)
            }),
        ));
        must(self.register_processor(
            "rate_limit",
            Arc::new(|conf, ctx| {
                let conf: RateLimitProcessorConfig = parse_conf(conf)?;
                Ok(Box::new(RateLimitProcessor::new(&conf, ctx.resources.clone()))
                    as Box<dyn Processor>)
            }),
        ));

        must(self.register_cache(
            "memory",
            Arc::new(|conf, _ctx| {
                let conf: crate::cache::memory::MemoryCacheConfig = parse_conf(conf)?;
                Ok(Box::new(crate::cache::memory::MemoryCache::new(&conf)) as Box<dyn Cache>)
            }),
        ));

        must(self.register_rate_limit(
            "local",
            Arc::new(|conf, _ctx| {
                let conf: crate::rate_limit::local::LocalRateLimitConfig = parse_conf(conf)?;
                Ok(Box::new(crate::rate_limit::local::LocalRateLimit::new(&conf)?)
                    as Box<dyn RateLimit>)
            }),
        ));
    }
}

#[derive(Debug, serde::Deserialize)]
struct ProcessorCaseConfig {
    #[serde(default)]
    check: Option<String>,
    #[serde(default)]
    processors: Vec<crate::config::ComponentConfig>,
}

fn build_processor_list(
    conf: &Value,
    ctx: &BuildContext<'_>,
) -> Result<Vec<Box<dyn Processor>>, Error> {
    let children: Vec<crate::config::ComponentConfig> = parse_conf(conf)?;
    let mut built = Vec::with_capacity(children.len());
    for child in &children {
        built.push(ctx.environment.build_processor(&child.type_name, &child.config, ctx)?);
    }
    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics;

    fn expect_err<T, E>(r: Result<T, E>) -> E {
        match r {
            Ok(_) => panic!("expected Err"),
            Err(e) => e,
        }
    }

    fn ctx<'a>(
        resources: &'a Arc<Resources>,
        env: &'a Environment,
        metrics: &'a MetricsHandle,
    ) -> BuildContext<'a> {
        BuildContext {
            resources,
            environment: env,
            metrics,
        }
    }

    #[test]
    fn defaults_register_builtins() {
        let env = Environment::with_defaults();
        assert!(env.has_input("generate"));
        assert!(env.has_input("file"));
        assert!(env.has_output("file"));
        assert!(env.has_processor("mapping"));
        assert!(env.has_processor("group_by_value"));
        assert!(env.has_cache("memory"));
        assert!(env.has_rate_limit("local"));
        assert!(!env.has_input("kafka"));
    }

    #[test]
    fn duplicate_type_registration_rejected() {
        let mut env = Environment::with_defaults();
        let err = env
            .register_input(
                "generate",
                Arc::new(|_conf, _ctx| {
                    Err(Error::Config("never constructed".into()))
                }),
            )
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateLabel { .. }));
    }

    #[test]
    fn clones_are_isolated() {
        let mut original = Environment::with_defaults();
        let mut cloned = original.clone();
        cloned
            .register_input(
                "only_in_clone",
                Arc::new(|_conf, _ctx| {
                    Err(Error::Config("never constructed".into()))
                }),
            )
            .unwrap();
        assert!(cloned.has_input("only_in_clone"));
        assert!(!original.has_input("only_in_clone"));
        // And the original can still take the name.
        assert!(original
            .register_input(
                "only_in_clone",
                Arc::new(|_conf, _ctx| Err(Error::Config("never constructed".into()))),
            )
            .is_ok());
    }

    #[test]
    fn builds_a_processor_from_config() {
        let env = Environment::with_defaults();
        let resources = Arc::new(Resources::new());
        let metrics = metrics::noop();
        let built = env.build_processor(
            "mapping",
            &serde_json::json!("root = content().uppercase()"),
            &ctx(&resources, &env, &metrics),
        );
        assert!(built.is_ok());
    }

    #[test]
    fn unknown_component_reports_kind_and_name() {
        let env = Environment::with_defaults();
        let resources = Arc::new(Resources::new());
        let metrics = metrics::noop();
        let err = expect_err(env.build_input(
            "kafka",
            &serde_json::json!({}),
            &ctx(&resources, &env, &metrics),
        ));
        assert_eq!(err.to_string(), "unable to locate input of type 'kafka'");
    }
}
