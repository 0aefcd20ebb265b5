//! Interpolated field expressions.
//!
//! String fields in component configs may embed `${! ... }` expressions
//! evaluated per message part at runtime (`${ENV}` expansion happens once
//! at load time in the config parser and never reaches this module). The
//! grammar is the small subset the built-in components need: a function
//! call optionally followed by chained methods.
//!
//! Functions: `content()`, `json("dot.path")`, `meta("key")`,
//! `count("name")`, `batch_size()`, `errored()`.
//! Methods: `uppercase()`, `lowercase()`, `trim()`, `equals("lit")`,
//! `not_empty()`, `or("fallback")`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use weir_types::{Batch, Error, Part};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Func {
    Content,
    Json(Option<String>),
    Meta(String),
    Count(String),
    BatchSize,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Method {
    Uppercase,
    Lowercase,
    Trim,
    Equals(String),
    NotEmpty,
    Or(String),
}

/// One parsed function call chain, e.g. `content().uppercase()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    func: Func,
    methods: Vec<Method>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Dynamic(Call),
}

/// A compiled interpolated string.
///
/// Cheap to clone; `count` counters are shared between clones so a policy
/// evaluated from several workers still hands out a single sequence.
#[derive(Debug, Clone)]
pub struct Expression {
    segments: Vec<Segment>,
    counters: Arc<Mutex<HashMap<String, u64>>>,
}

impl Expression {
    /// Compile an interpolated string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed `${! ... }` sections.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut segments = Vec::new();
        let mut rest = input;
        while let Some(start) = rest.find("${!") {
            if !rest[..start].is_empty() {
                segments.push(Segment::Static(rest[..start].to_string()));
            }
            let after = &rest[start + 3..];
            let end = after.find('}').ok_or_else(|| {
                Error::Config(format!("unterminated interpolation in '{input}'"))
            })?;
            let call = parse_call(after[..end].trim())?;
            segments.push(Segment::Dynamic(call));
            rest = &after[end + 1..];
        }
        if !rest.is_empty() || segments.is_empty() {
            segments.push(Segment::Static(rest.to_string()));
        }
        Ok(Self {
            segments,
            counters: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Compile a bare call chain (no surrounding static text), as used by
    /// mapping assignments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed input.
    pub fn parse_call_chain(input: &str) -> Result<Self, Error> {
        let call = parse_call(input.trim())?;
        Ok(Self {
            segments: vec![Segment::Dynamic(call)],
            counters: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Returns `true` when the expression contains no dynamic section.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Static(_)))
    }

    /// Evaluate against the part at `index` of `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Processing`] when a function cannot be resolved
    /// against the part (bad JSON, missing index).
    pub fn eval(&self, batch: &mut Batch, index: usize) -> Result<String, Error> {
        let size = batch.len();
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Static(s) => out.push_str(s),
                Segment::Dynamic(call) => {
                    let part = batch
                        .get_mut(index)
                        .ok_or_else(|| Error::Processing(format!("no part at index {index}")))?;
                    out.push_str(&self.eval_call(call, part, size)?);
                }
            }
        }
        Ok(out)
    }

    /// Evaluate against a single part (batch size reported as 1).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Processing`] when a function cannot be resolved.
    pub fn eval_part(&self, part: &mut Part) -> Result<String, Error> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Static(s) => out.push_str(s),
                Segment::Dynamic(call) => out.push_str(&self.eval_call(call, part, 1)?),
            }
        }
        Ok(out)
    }

    fn eval_call(&self, call: &Call, part: &mut Part, batch_size: usize) -> Result<String, Error> {
        let mut value = match &call.func {
            Func::Content => String::from_utf8_lossy(part.as_bytes()?).into_owned(),
            Func::Json(path) => {
                let root = part.structured()?;
                let target = match path {
                    Some(p) => lookup_path(root, p),
                    None => Some(root),
                };
                match target {
                    Some(v) => stringify(v),
                    None => String::new(),
                }
            }
            Func::Meta(key) => part.meta(key).unwrap_or_default().to_string(),
            Func::Count(name) => {
                let mut counters = self
                    .counters
                    .lock()
                    .map_err(|_| Error::Processing("counter mutex poisoned".into()))?;
                let n = counters.entry(name.clone()).or_insert(0);
                *n += 1;
                n.to_string()
            }
            Func::BatchSize => batch_size.to_string(),
            Func::Errored => part.failed().is_some().to_string(),
        };
        for method in &call.methods {
            value = match method {
                Method::Uppercase => value.to_uppercase(),
                Method::Lowercase => value.to_lowercase(),
                Method::Trim => value.trim().to_string(),
                Method::Equals(lit) => (&value == lit).to_string(),
                Method::NotEmpty => (!value.is_empty()).to_string(),
                Method::Or(fallback) => {
                    if value.is_empty() {
                        fallback.clone()
                    } else {
                        value
                    }
                }
            };
        }
        Ok(value)
    }
}

/// Render a JSON value the way interpolations expect: strings raw,
/// everything else JSON-encoded.
fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn lookup_path<'a>(root: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = root;
    for key in path.split('.') {
        current = current.get(key)?;
    }
    Some(current)
}

fn parse_call(src: &str) -> Result<Call, Error> {
    let mut parts = split_chain(src)?;
    if parts.is_empty() {
        return Err(Error::Config("empty interpolation".into()));
    }
    let (name, arg) = parts.remove(0);
    let func = match (name.as_str(), arg) {
        ("content", None) => Func::Content,
        ("json", arg) => Func::Json(arg),
        ("meta", Some(key)) => Func::Meta(key),
        ("count", Some(name)) => Func::Count(name),
        ("batch_size", None) => Func::BatchSize,
        ("errored", None) => Func::Errored,
        (other, _) => {
            return Err(Error::Config(format!("unknown function '{other}'")));
        }
    };
    let mut methods = Vec::new();
    for (name, arg) in parts {
        methods.push(match (name.as_str(), arg) {
            ("uppercase", None) => Method::Uppercase,
            ("lowercase", None) => Method::Lowercase,
            ("trim", None) => Method::Trim,
            ("equals", Some(lit)) => Method::Equals(lit),
            ("not_empty", None) => Method::NotEmpty,
            ("or", Some(fallback)) => Method::Or(fallback),
            (other, _) => {
                return Err(Error::Config(format!("unknown method '{other}'")));
            }
        });
    }
    Ok(Call { func, methods })
}

/// Split `a("x").b().c("y")` into `[(a, Some(x)), (b, None), (c, Some(y))]`.
fn split_chain(src: &str) -> Result<Vec<(String, Option<String>)>, Error> {
    let mut out = Vec::new();
    let mut chars = src.chars().peekable();
    loop {
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(Error::Config(format!("expected function name in '{src}'")));
        }
        if chars.next() != Some('(') {
            return Err(Error::Config(format!("expected '(' after '{name}'")));
        }
        let mut arg = None;
        match chars.peek() {
            Some(')') => {
                chars.next();
            }
            Some('"') => {
                chars.next();
                let mut lit = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => lit.push(c),
                        None => {
                            return Err(Error::Config(format!(
                                "unterminated string argument in '{src}'"
                            )));
                        }
                    }
                }
                if chars.next() != Some(')') {
                    return Err(Error::Config(format!("expected ')' after argument in '{src}'")));
                }
                arg = Some(lit);
            }
            _ => {
                return Err(Error::Config(format!(
                    "arguments must be double-quoted strings in '{src}'"
                )));
            }
        }
        out.push((name, arg));
        match chars.next() {
            None => break,
            Some('.') => {}
            Some(c) => {
                return Err(Error::Config(format!("unexpected '{c}' in '{src}'")));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn single(content: &str) -> Batch {
        [Part::new(content.to_string())].into_iter().collect()
    }

    #[test]
    fn static_passthrough() {
        let expr = Expression::parse("plain text").unwrap();
        assert!(expr.is_static());
        let mut batch = single("ignored");
        assert_eq!(expr.eval(&mut batch, 0).unwrap(), "plain text");
    }

    #[test]
    fn content_uppercase() {
        let expr = Expression::parse("${! content().uppercase() }").unwrap();
        let mut batch = single("hello world 1");
        assert_eq!(expr.eval(&mut batch, 0).unwrap(), "HELLO WORLD 1");
    }

    #[test]
    fn mixed_static_and_dynamic() {
        let expr = Expression::parse("key=${! json(\"k\") }!").unwrap();
        let mut batch = single(r#"{"k":42}"#);
        assert_eq!(expr.eval(&mut batch, 0).unwrap(), "key=42!");
    }

    #[test]
    fn json_string_values_render_raw() {
        let expr = Expression::parse("${! json(\"name\") }").unwrap();
        let mut batch = single(r#"{"name":"ada"}"#);
        assert_eq!(expr.eval(&mut batch, 0).unwrap(), "ada");
    }

    #[test]
    fn json_dot_path() {
        let expr = Expression::parse("${! json(\"a.b\") }").unwrap();
        let mut batch = single(r#"{"a":{"b":[1,2]}}"#);
        assert_eq!(expr.eval(&mut batch, 0).unwrap(), "[1,2]");
    }

    #[test]
    fn meta_lookup_and_fallback() {
        let expr = Expression::parse("${! meta(\"topic\").or(\"none\") }").unwrap();
        let mut part = Part::new("x");
        assert_eq!(expr.eval_part(&mut part).unwrap(), "none");
        part.set_meta("topic", "orders");
        assert_eq!(expr.eval_part(&mut part).unwrap(), "orders");
    }

    #[test]
    fn count_increments_per_eval() {
        let expr = Expression::parse("n ${! count(\"seq\") }").unwrap();
        let mut batch = single("x");
        assert_eq!(expr.eval(&mut batch, 0).unwrap(), "n 1");
        assert_eq!(expr.eval(&mut batch, 0).unwrap(), "n 2");
        assert_eq!(expr.eval(&mut batch, 0).unwrap(), "n 3");
    }

    #[test]
    fn count_shared_between_clones() {
        let expr = Expression::parse("${! count(\"seq\") }").unwrap();
        let cloned = expr.clone();
        let mut batch = single("x");
        assert_eq!(expr.eval(&mut batch, 0).unwrap(), "1");
        assert_eq!(cloned.eval(&mut batch, 0).unwrap(), "2");
    }

    #[test]
    fn errored_reflects_failure_flag() {
        let expr = Expression::parse("${! errored() }").unwrap();
        let mut part = Part::new("x");
        assert_eq!(expr.eval_part(&mut part).unwrap(), "false");
        part.set_failed("boom");
        assert_eq!(expr.eval_part(&mut part).unwrap(), "true");
    }

    #[test]
    fn equals_renders_bool() {
        let expr = Expression::parse("${! json(\"k\").equals(\"1\") }").unwrap();
        let mut batch = single(r#"{"k":1}"#);
        assert_eq!(expr.eval(&mut batch, 0).unwrap(), "true");
    }

    #[test]
    fn batch_size_function() {
        let expr = Expression::parse("${! batch_size() }").unwrap();
        let mut batch: Batch = [Part::new("a"), Part::new("b")].into_iter().collect();
        assert_eq!(expr.eval(&mut batch, 0).unwrap(), "2");
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            Expression::parse("${! nope() }"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Expression::parse("${! content("),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Expression::parse("${! content().wat() }"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Expression::parse("${! meta(unquoted) }"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn env_style_vars_are_not_interpolations() {
        let expr = Expression::parse("${NOT_DYNAMIC}").unwrap();
        assert!(expr.is_static());
    }
}
