//! Control-flow processors: `try`, `catch`, and `switch`.
//!
//! All three are ordinary processors that inspect and mutate the
//! per-part failure flag rather than returning batch-level errors.

use async_trait::async_trait;

use weir_sdk::Processor;
use weir_types::{Batch, Error};

use super::{close_chain, run_chain};
use crate::interpolate::Expression;

/// Applies children in order, stopping once any part carries the failure
/// flag.
pub struct TryProcessor {
    children: Vec<Box<dyn Processor>>,
}

impl TryProcessor {
    #[must_use]
    pub fn new(children: Vec<Box<dyn Processor>>) -> Self {
        Self { children }
    }
}

fn any_failed(batches: &[Batch]) -> bool {
    batches
        .iter()
        .any(|b| b.iter().any(|p| p.failed().is_some()))
}

#[async_trait]
impl Processor for TryProcessor {
    async fn process_batch(&mut self, batch: Batch) -> Result<Vec<Batch>, Error> {
        let mut current = vec![batch];
        for child in &mut self.children {
            if any_failed(&current) {
                break;
            }
            let mut produced = Vec::new();
            for batch in current.drain(..) {
                produced.extend(child.process_batch(batch).await?);
            }
            if produced.is_empty() {
                return Ok(Vec::new());
            }
            current = produced;
        }
        Ok(current)
    }

    async fn close(&mut self) -> Result<(), Error> {
        close_chain(&mut self.children).await
    }
}

/// Applies children only to parts carrying the failure flag; their flags
/// are cleared first so a successful recovery leaves clean parts. When
/// the recovered parts come back one-to-one they resume their original
/// positions; otherwise they are appended after the healthy parts.
pub struct CatchProcessor {
    children: Vec<Box<dyn Processor>>,
}

impl CatchProcessor {
    #[must_use]
    pub fn new(children: Vec<Box<dyn Processor>>) -> Self {
        Self { children }
    }
}

#[async_trait]
impl Processor for CatchProcessor {
    async fn process_batch(&mut self, batch: Batch) -> Result<Vec<Batch>, Error> {
        let mut healthy: Vec<(usize, weir_types::Part)> = Vec::new();
        let mut failed: Vec<(usize, weir_types::Part)> = Vec::new();
        for (index, mut part) in batch.into_iter().enumerate() {
            if part.failed().is_some() {
                part.clear_failed();
                failed.push((index, part));
            } else {
                healthy.push((index, part));
            }
        }
        if failed.is_empty() {
            let batch: Batch = healthy.into_iter().map(|(_, p)| p).collect();
            return Ok(vec![batch]);
        }

        let indices: Vec<usize> = failed.iter().map(|(i, _)| *i).collect();
        let sub: Batch = failed.into_iter().map(|(_, p)| p).collect();
        let recovered = run_chain(&mut self.children, sub).await?;
        let recovered: Vec<weir_types::Part> = recovered
            .into_iter()
            .flat_map(Batch::into_parts)
            .collect();

        let mut slots: Vec<(usize, weir_types::Part)> = healthy;
        if recovered.len() == indices.len() {
            slots.extend(indices.into_iter().zip(recovered));
            slots.sort_by_key(|(i, _)| *i);
        } else {
            let base = slots.len() + recovered.len();
            slots.extend(
                recovered
                    .into_iter()
                    .enumerate()
                    .map(|(offset, p)| (base + offset, p)),
            );
        }
        let batch: Batch = slots.into_iter().map(|(_, p)| p).collect();
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![batch])
    }

    async fn close(&mut self) -> Result<(), Error> {
        close_chain(&mut self.children).await
    }
}

/// One `switch` processor case.
pub struct ProcessorCase {
    /// Predicate over the part; rendered `"true"` matches. `None` always
    /// matches.
    pub check: Option<Expression>,
    pub processors: Vec<Box<dyn Processor>>,
}

/// Routes each part to the first matching case and applies that case's
/// chain. Output batches are produced in case order.
pub struct SwitchProcessor {
    cases: Vec<ProcessorCase>,
}

impl SwitchProcessor {
    #[must_use]
    pub fn new(cases: Vec<ProcessorCase>) -> Self {
        Self { cases }
    }
}

#[async_trait]
impl Processor for SwitchProcessor {
    async fn process_batch(&mut self, batch: Batch) -> Result<Vec<Batch>, Error> {
        let mut routed: Vec<Batch> = (0..self.cases.len()).map(|_| Batch::new()).collect();
        for mut part in batch {
            let mut target = None;
            for (index, case) in self.cases.iter().enumerate() {
                let hit = match &case.check {
                    None => true,
                    Some(expr) => expr.eval_part(&mut part)? == "true",
                };
                if hit {
                    target = Some(index);
                    break;
                }
            }
            if let Some(index) = target {
                routed[index].push(part);
            }
            // Parts matching no case are dropped.
        }

        let mut out = Vec::new();
        for (case, sub) in self.cases.iter_mut().zip(routed) {
            if sub.is_empty() {
                continue;
            }
            out.extend(run_chain(&mut case.processors, sub).await?);
        }
        Ok(out)
    }

    async fn close(&mut self) -> Result<(), Error> {
        let mut first_err = None;
        for case in &mut self.cases {
            if let Err(err) = close_chain(&mut case.processors).await {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::mapping::MappingProcessor;
    use weir_types::Part;

    fn batch_of(contents: &[&str]) -> Batch {
        contents.iter().map(|c| Part::new(c.to_string())).collect()
    }

    async fn contents(batches: Vec<Batch>) -> Vec<String> {
        let mut out = Vec::new();
        for batch in batches {
            for mut part in batch {
                out.push(String::from_utf8(part.bytes().unwrap().to_vec()).unwrap());
            }
        }
        out
    }

    fn uppercase() -> Box<dyn Processor> {
        Box::new(MappingProcessor::new("root = content().uppercase()").unwrap())
    }

    fn parse_json() -> Box<dyn Processor> {
        // Flags parts whose payload is not valid JSON.
        Box::new(MappingProcessor::new(r#"root = json()"#).unwrap())
    }

    #[tokio::test]
    async fn try_stops_after_first_failure() {
        let mut proc = TryProcessor::new(vec![parse_json(), uppercase()]);
        let out = proc
            .process_batch(batch_of(&["not json", "also not"]))
            .await
            .unwrap();
        // The uppercase child never ran: payloads keep their case.
        assert_eq!(contents(out).await, vec!["not json", "also not"]);
    }

    #[tokio::test]
    async fn try_runs_all_children_when_clean() {
        let mut proc = TryProcessor::new(vec![uppercase()]);
        let out = proc.process_batch(batch_of(&["abc"])).await.unwrap();
        assert_eq!(contents(out).await, vec!["ABC"]);
    }

    #[tokio::test]
    async fn catch_recovers_only_failed_parts() {
        let mut batch = batch_of(&["fine", "broken"]);
        batch.get_mut(1).unwrap().set_failed("upstream exploded");

        let mut proc = CatchProcessor::new(vec![uppercase()]);
        let out = proc.process_batch(batch).await.unwrap();
        assert_eq!(out.len(), 1);
        let batch = &out[0];
        // Healthy part untouched, failed part recovered in place.
        assert_eq!(contents(vec![batch.shallow_copy()]).await, vec!["fine", "BROKEN"]);
        assert!(batch.iter().all(|p| p.failed().is_none()));
    }

    #[tokio::test]
    async fn catch_without_failures_is_passthrough() {
        let mut proc = CatchProcessor::new(vec![uppercase()]);
        let out = proc.process_batch(batch_of(&["calm"])).await.unwrap();
        assert_eq!(contents(out).await, vec!["calm"]);
    }

    #[tokio::test]
    async fn switch_routes_parts_by_predicate() {
        let mut proc = SwitchProcessor::new(vec![
            ProcessorCase {
                check: Some(
                    Expression::parse("${! content().equals(\"a\") }").unwrap(),
                ),
                processors: vec![uppercase()],
            },
            ProcessorCase {
                check: None,
                processors: vec![],
            },
        ]);
        let out = proc.process_batch(batch_of(&["a", "b", "a"])).await.unwrap();
        assert_eq!(contents(out).await, vec!["A", "A", "b"]);
    }
}
