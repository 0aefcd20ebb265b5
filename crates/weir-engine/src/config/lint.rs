//! Semantic lint pass over a parsed stream configuration.
//!
//! Collects every violation before failing so an operator fixes one
//! round of errors, not one error per round. Component type names are
//! resolved against an [`Environment`]; the broker / retry / switch
//! wrapper forms are recognised structurally and recursed into.

use std::collections::HashSet;

use weir_types::Error;

use crate::batcher::BatchPolicy;
use crate::config::types::{ComponentConfig, StreamConfig};
use crate::environment::Environment;

/// Lint a stream config against an environment.
///
/// # Errors
///
/// Returns [`Error::Config`] listing all violations found.
pub fn lint(config: &StreamConfig, env: &Environment) -> Result<(), Error> {
    let mut errors = Vec::new();
    let mut labels = HashSet::new();

    if config.pipeline.threads == 0 {
        errors.push("pipeline.threads must be at least 1".to_string());
    }

    lint_input(&config.input, env, &mut labels, &mut errors, "input");
    for (i, proc) in config.pipeline.processors.iter().enumerate() {
        lint_processor(
            proc,
            env,
            &mut labels,
            &mut errors,
            &format!("pipeline.processors[{i}]"),
        );
    }
    lint_output(&config.output, env, &mut labels, &mut errors, "output");

    if let Some(buffer) = &config.buffer {
        if buffer.type_name != "none" && buffer.type_name != "memory" {
            errors.push(format!(
                "buffer: unknown buffer type '{}'",
                buffer.type_name
            ));
        }
    }

    lint_resources(config, env, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "stream lint failed:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}

fn claim_label(
    component: &ComponentConfig,
    labels: &mut HashSet<String>,
    errors: &mut Vec<String>,
    at: &str,
) {
    if let Some(label) = &component.label {
        if label.is_empty() {
            errors.push(format!("{at}: label must not be empty"));
        } else if !labels.insert(label.clone()) {
            errors.push(format!("{at}: label '{label}' collides with another component"));
        }
    }
}

fn lint_batching(component: &ComponentConfig, errors: &mut Vec<String>, at: &str) {
    if let Some(batching) = &component.batching {
        if let Err(err) = BatchPolicy::from_config(batching) {
            errors.push(format!("{at}.batching: {err}"));
        }
    }
}

fn lint_input(
    component: &ComponentConfig,
    env: &Environment,
    labels: &mut HashSet<String>,
    errors: &mut Vec<String>,
    at: &str,
) {
    claim_label(component, labels, errors, at);
    match component.type_name.as_str() {
        "broker" => {
            match component.children("inputs") {
                Ok(children) if children.is_empty() => {
                    errors.push(format!("{at}: broker needs at least one child input"));
                }
                Ok(children) => {
                    for (i, child) in children.iter().enumerate() {
                        lint_input(child, env, labels, errors, &format!("{at}.inputs[{i}]"));
                    }
                }
                Err(err) => errors.push(err.to_string()),
            }
            if let Some(copies) = component.config.get("copies") {
                if !copies.as_u64().is_some_and(|c| c >= 1) {
                    errors.push(format!("{at}: broker copies must be a positive integer"));
                }
            }
        }
        "resource" => {
            if !component.config.is_string() {
                errors.push(format!("{at}: resource reference must be a string label"));
            }
        }
        name if !env.has_input(name) => {
            errors.push(format!("{at}: unknown input type '{name}'"));
        }
        _ => {}
    }
}

fn lint_output(
    component: &ComponentConfig,
    env: &Environment,
    labels: &mut HashSet<String>,
    errors: &mut Vec<String>,
    at: &str,
) {
    claim_label(component, labels, errors, at);
    lint_batching(component, errors, at);
    match component.type_name.as_str() {
        "broker" => match component.children("outputs") {
            Ok(children) if children.is_empty() => {
                errors.push(format!("{at}: broker needs at least one child output"));
            }
            Ok(children) => {
                let pattern = component.config.get("pattern").and_then(|p| p.as_str());
                match pattern {
                    Some("fan_out" | "fan_out_sequential" | "round_robin" | "greedy") => {}
                    Some(other) => {
                        errors.push(format!("{at}: unknown broker pattern '{other}'"));
                    }
                    None => errors.push(format!("{at}: broker is missing its pattern")),
                }
                for (i, child) in children.iter().enumerate() {
                    lint_output(child, env, labels, errors, &format!("{at}.outputs[{i}]"));
                }
            }
            Err(err) => errors.push(err.to_string()),
        },
        "retry" => match component.child("output") {
            Ok(child) => lint_output(&child, env, labels, errors, &format!("{at}.output")),
            Err(err) => errors.push(err.to_string()),
        },
        "switch" => match component.children("cases") {
            Ok(_) => {
                // Cases carry their own shape: {check?, continue?, output}.
                match component.config.get("cases").and_then(|c| c.as_array()) {
                    Some(cases) if cases.is_empty() => {
                        errors.push(format!("{at}: switch needs at least one case"));
                    }
                    Some(cases) => {
                        for (i, case) in cases.iter().enumerate() {
                            match case
                                .get("output")
                                .cloned()
                                .map(serde_json::from_value::<ComponentConfig>)
                            {
                                Some(Ok(child)) => lint_output(
                                    &child,
                                    env,
                                    labels,
                                    errors,
                                    &format!("{at}.cases[{i}].output"),
                                ),
                                Some(Err(err)) => {
                                    errors.push(format!("{at}.cases[{i}].output: {err}"));
                                }
                                None => {
                                    errors.push(format!("{at}.cases[{i}]: missing output"));
                                }
                            }
                        }
                    }
                    None => errors.push(format!("{at}: switch cases must be a list")),
                }
            }
            Err(_) => errors.push(format!("{at}: switch cases must be a list")),
        },
        "resource" => {
            if !component.config.is_string() {
                errors.push(format!("{at}: resource reference must be a string label"));
            }
        }
        name if !env.has_output(name) => {
            errors.push(format!("{at}: unknown output type '{name}'"));
        }
        _ => {}
    }
}

fn lint_processor(
    component: &ComponentConfig,
    env: &Environment,
    labels: &mut HashSet<String>,
    errors: &mut Vec<String>,
    at: &str,
) {
    claim_label(component, labels, errors, at);
    match component.type_name.as_str() {
        "try" | "catch" => {
            match serde_json::from_value::<Vec<ComponentConfig>>(component.config.clone()) {
                Ok(children) => {
                    for (i, child) in children.iter().enumerate() {
                        lint_processor(child, env, labels, errors, &format!("{at}[{i}]"));
                    }
                }
                Err(err) => errors.push(format!("{at}: {err}")),
            }
        }
        name if !env.has_processor(name) => {
            errors.push(format!("{at}: unknown processor type '{name}'"));
        }
        _ => {}
    }
}

fn lint_resources(config: &StreamConfig, env: &Environment, errors: &mut Vec<String>) {
    lint_resource_section("input_resources", &config.input_resources, errors, |n| {
        env.has_input(n)
    });
    lint_resource_section("output_resources", &config.output_resources, errors, |n| {
        env.has_output(n)
    });
    lint_resource_section(
        "processor_resources",
        &config.processor_resources,
        errors,
        |n| env.has_processor(n),
    );
    lint_resource_section("cache_resources", &config.cache_resources, errors, |n| {
        env.has_cache(n)
    });
    lint_resource_section(
        "rate_limit_resources",
        &config.rate_limit_resources,
        errors,
        |n| env.has_rate_limit(n),
    );
}

fn lint_resource_section(
    section: &str,
    components: &[ComponentConfig],
    errors: &mut Vec<String>,
    known: impl Fn(&str) -> bool,
) {
    let mut seen = HashSet::new();
    for (i, component) in components.iter().enumerate() {
        match &component.label {
            None => errors.push(format!("{section}[{i}]: resources must carry a label")),
            Some(label) if label.is_empty() => {
                errors.push(format!("{section}[{i}]: label must not be empty"));
            }
            Some(label) => {
                if !seen.insert(label.clone()) {
                    errors.push(format!(
                        "{section}[{i}]: label '{label}' is declared twice"
                    ));
                }
            }
        }
        if !known(&component.type_name) {
            errors.push(format!(
                "{section}[{i}]: unknown type '{}'",
                component.type_name
            ));
        }
    }
}
