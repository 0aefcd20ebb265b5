//! Mapping processor: rewrite each part's payload from an expression.
//!
//! The config is a single assignment, e.g.
//! `root = content().uppercase()` or `root = "prefix ${! json(\"id\") }"`.
//! `root = deleted()` drops the part. An evaluation failure annotates the
//! part instead of failing the batch.

use async_trait::async_trait;

use weir_sdk::Processor;
use weir_types::{Batch, Error};

use crate::interpolate::Expression;

#[derive(Debug, Clone)]
enum Rhs {
    Deleted,
    Expr(Expression),
}

/// A compiled `root = ...` assignment.
#[derive(Debug, Clone)]
pub struct Mapping {
    rhs: Rhs,
}

impl Mapping {
    /// Compile a mapping assignment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on anything other than a single `root =`
    /// assignment over the supported expression subset.
    pub fn parse(src: &str) -> Result<Self, Error> {
        let Some((lhs, rhs)) = src.split_once('=') else {
            return Err(Error::Config(format!(
                "mapping must be an assignment, got '{src}'"
            )));
        };
        if lhs.trim() != "root" {
            return Err(Error::Config(format!(
                "only 'root' assignments are supported, got '{}'",
                lhs.trim()
            )));
        }
        let rhs = rhs.trim();
        if rhs == "deleted()" {
            return Ok(Self { rhs: Rhs::Deleted });
        }
        if let Some(inner) = rhs.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            return Ok(Self {
                rhs: Rhs::Expr(Expression::parse(inner)?),
            });
        }
        Ok(Self {
            rhs: Rhs::Expr(Expression::parse_call_chain(rhs)?),
        })
    }
}

pub struct MappingProcessor {
    mapping: Mapping,
}

impl MappingProcessor {
    /// Build from the raw config string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on a malformed mapping.
    pub fn new(src: &str) -> Result<Self, Error> {
        Ok(Self {
            mapping: Mapping::parse(src)?,
        })
    }
}

#[async_trait]
impl Processor for MappingProcessor {
    async fn process_batch(&mut self, batch: Batch) -> Result<Vec<Batch>, Error> {
        let mut out = Batch::new();
        for mut part in batch {
            match &self.mapping.rhs {
                Rhs::Deleted => {}
                Rhs::Expr(expr) => {
                    match expr.eval_part(&mut part) {
                        Ok(rendered) => part.set_bytes(rendered),
                        Err(err) => {
                            tracing::debug!("mapping failed: {err}");
                            part.set_failed(err.to_string());
                        }
                    }
                    out.push(part);
                }
            }
        }
        if out.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![out])
    }

    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
