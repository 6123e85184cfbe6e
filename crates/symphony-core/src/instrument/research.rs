//! The research instrument: an iterative hypothesize / gather / analyze
//! / reflect loop over the reasoning and web-search capabilities.
//!
//! Each iteration emits one checkpoint through the context. Spawn
//! directives surfaced by the analysis step re-enter the conductor via
//! `ctx.spawn`; a depth violation is recorded as a finding and forces a
//! `bounded` outcome with a discrepancy naming the limit. Tool failures
//! degrade to low-confidence synthetic findings so a single bad call
//! never kills the loop.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use symphony_db::models::{Outcome, ProcessType};

use crate::context::{Checkpoint, TaskContext};
use crate::error::LoopError;
use crate::instrument::{Instrument, InstrumentSpec};
use crate::termination::{
    self, Contradiction, Decision, IterationSnapshot, TerminationConfig,
};
use crate::tools::{ToolRegistry, ToolSet, caps};
use crate::types::{ExecutionMetadata, Finding, InstrumentResult};

const DEFAULT_MAX_ITERATIONS: u32 = 5;
/// Confidence assigned to a synthetic finding recorded for a failed
/// tool call.
const SYNTHETIC_CONFIDENCE: f64 = 0.1;

pub struct ResearchInstrument {
    spec: InstrumentSpec,
    tools: ToolSet,
    termination: TerminationConfig,
}

impl ResearchInstrument {
    pub fn new(
        registry: &ToolRegistry,
        termination: TerminationConfig,
    ) -> Result<Self, LoopError> {
        let spec = InstrumentSpec {
            name: "research".to_string(),
            required_capabilities: vec![
                caps::REASONING.to_string(),
                caps::WEB_SEARCH.to_string(),
            ],
            optional_capabilities: vec![],
            max_iterations: DEFAULT_MAX_ITERATIONS,
            process_type: ProcessType::SemiAutonomic,
        };
        let tools = registry.resolve(&[caps::REASONING, caps::WEB_SEARCH], &[])?;
        Ok(Self {
            spec,
            tools,
            termination,
        })
    }

    fn effective_termination(&self, ctx: &TaskContext) -> TerminationConfig {
        match ctx.overrides.confidence_threshold {
            Some(threshold) => self.termination.with_confidence_threshold(threshold),
            None => self.termination,
        }
    }
}

/// Outcome of one analysis call.
struct Analysis {
    text: String,
    confidence: f64,
    spawn: Vec<String>,
    contradiction: Option<Contradiction>,
}

#[async_trait]
impl Instrument for ResearchInstrument {
    fn spec(&self) -> &InstrumentSpec {
        &self.spec
    }

    async fn execute(
        &self,
        query: &str,
        ctx: &TaskContext,
    ) -> Result<InstrumentResult, LoopError> {
        let started = Instant::now();
        let max_iterations = ctx
            .overrides
            .max_iterations
            .unwrap_or(self.spec.max_iterations);
        let term_config = self.effective_termination(ctx);

        let mut metadata = ExecutionMetadata::new(&self.spec.name, self.spec.process_type);
        let mut findings: Vec<Finding> = Vec::new();
        let mut history: Vec<IterationSnapshot> = Vec::new();
        let mut summary = String::new();
        let mut discrepancy: Option<String> = None;
        let mut outcome = Outcome::Bounded;
        // Set when a spawn violation forces the loop closed.
        let mut forced: Option<(Outcome, String)> = None;

        for iteration in 1..=max_iterations {
            ctx.check_cancelled()?;
            let iter_started = Instant::now();

            // Phase 1: hypothesize.
            let hypothesis = match self
                .tools
                .call(
                    caps::REASONING,
                    json!({
                        "prompt": format!(
                            "Query: {query}\nKnown so far: {summary}\n\
                             State the single most useful hypothesis to test next."
                        ),
                        "mode": "hypothesize",
                    }),
                )
                .await
            {
                Ok(reply) => reply["text"].as_str().unwrap_or(query).to_string(),
                Err(LoopError::Tool { tool, message }) => {
                    ctx.record_error("tool", format!("{tool}: {message}")).await;
                    findings.push(Finding::new(
                        format!("hypothesis step degraded: {message}"),
                        SYNTHETIC_CONFIDENCE,
                    ));
                    query.to_string()
                }
                Err(e) => return Err(e),
            };

            // Phase 2: gather via web search.
            let mut new_sources = 0usize;
            let mut snippets: Vec<Value> = Vec::new();
            match self
                .tools
                .call(caps::WEB_SEARCH, json!({"query": hypothesis}))
                .await
            {
                Ok(reply) => {
                    for result in reply["results"].as_array().into_iter().flatten() {
                        if let Some(url) = result["url"].as_str() {
                            if !metadata.sources_consulted.iter().any(|s| s == url) {
                                metadata.sources_consulted.push(url.to_string());
                                new_sources += 1;
                            }
                        }
                        snippets.push(result.clone());
                    }
                }
                Err(LoopError::Tool { tool, message }) => {
                    ctx.record_error("tool", format!("{tool}: {message}")).await;
                    findings.push(Finding::new(
                        format!("search unavailable this iteration: {message}"),
                        SYNTHETIC_CONFIDENCE,
                    ));
                }
                Err(e) => return Err(e),
            }

            // Phase 3: analyze.
            let analysis = match self
                .tools
                .call(
                    caps::REASONING,
                    json!({
                        "prompt": format!(
                            "Query: {query}\nHypothesis: {hypothesis}\n\
                             Evidence: {}\n\
                             Analyze the evidence, state what is now known and \
                             how confident you are.",
                            serde_json::to_string(&snippets).unwrap_or_default()
                        ),
                        "mode": "analyze",
                    }),
                )
                .await
            {
                Ok(reply) => Analysis {
                    text: reply["text"].as_str().unwrap_or_default().to_string(),
                    confidence: reply["confidence"].as_f64().unwrap_or(0.0),
                    spawn: reply["spawn"]
                        .as_array()
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(|v| v.as_str().map(str::to_owned))
                                .collect()
                        })
                        .unwrap_or_default(),
                    contradiction: reply["contradiction"].as_str().map(|d| Contradiction {
                        description: d.to_string(),
                        severity: reply["contradiction_severity"].as_f64().unwrap_or(0.6),
                    }),
                },
                Err(LoopError::Tool { tool, message }) => {
                    ctx.record_error("tool", format!("{tool}: {message}")).await;
                    findings.push(Finding::new(
                        format!("analysis degraded: {message}"),
                        SYNTHETIC_CONFIDENCE,
                    ));
                    Analysis {
                        text: String::new(),
                        confidence: history.last().map(|s| s.confidence).unwrap_or(0.0),
                        spawn: Vec::new(),
                        contradiction: None,
                    }
                }
                Err(e) => return Err(e),
            };

            if !analysis.text.is_empty() {
                summary = analysis.text.clone();
                let mut finding = Finding::new(analysis.text.clone(), analysis.confidence);
                if let Some(source) = metadata.sources_consulted.last() {
                    finding = finding.with_source(source.clone());
                }
                findings.push(finding);
            }

            // Sub-tasks requested by the analysis. Depth enforcement
            // lives behind the spawn callback.
            for sub_query in &analysis.spawn {
                match ctx.spawn(sub_query.clone()).await {
                    Ok(sub_result) => {
                        debug!(sub_query = %sub_query, outcome = %sub_result.outcome, "embedded sub-task result");
                        let mut content = sub_result.summary.clone();
                        if let Some(d) = &sub_result.discrepancy {
                            content.push_str(&format!(" [sub-task discrepancy: {d}]"));
                        }
                        findings.push(
                            Finding::new(content, sub_result.confidence)
                                .with_source(format!("sub-task: {sub_query}")),
                        );
                    }
                    Err(LoopError::DepthExceeded { depth, max_depth }) => {
                        let message =
                            format!("sub-task {sub_query:?} rejected: depth {depth} exceeds limit {max_depth}");
                        ctx.record_error("depth_exceeded", message.clone()).await;
                        findings.push(Finding::new(message.clone(), SYNTHETIC_CONFIDENCE));
                        forced = Some((Outcome::Bounded, message));
                        break;
                    }
                    Err(LoopError::Cancelled) => return Err(LoopError::Cancelled),
                    Err(e) => {
                        ctx.record_error(e.kind(), e.to_string()).await;
                        findings.push(Finding::new(
                            format!("sub-task {sub_query:?} failed: {e}"),
                            SYNTHETIC_CONFIDENCE,
                        ));
                    }
                }
            }

            // Phase 4: reflect and record.
            history.push(IterationSnapshot {
                iteration,
                confidence: analysis.confidence,
                new_sources,
                contradiction: analysis.contradiction,
            });
            metadata.iterations = iteration;

            ctx.checkpoint(Checkpoint {
                iteration_num: iteration,
                phase: "reflection".to_string(),
                input: json!({"hypothesis": hypothesis}),
                output: json!({
                    "confidence": analysis.confidence,
                    "new_sources": new_sources,
                    "findings": findings.len(),
                }),
                duration_ms: iter_started.elapsed().as_millis() as u64,
            })
            .await?;

            if let Some((forced_outcome, reason)) = forced.take() {
                outcome = forced_outcome;
                discrepancy = Some(reason);
                break;
            }

            match termination::evaluate(&term_config, &history, max_iterations) {
                Decision::Stop {
                    outcome: stop_outcome,
                    discrepancy: stop_discrepancy,
                } => {
                    outcome = stop_outcome;
                    discrepancy = stop_discrepancy;
                    break;
                }
                Decision::Continue => {}
            }

            // Cooperative yield between iterations.
            tokio::task::yield_now().await;
        }

        // A loop that produced nothing but degraded findings made no
        // progress; classify it as bounded rather than pretending.
        let confidence = history.last().map(|s| s.confidence).unwrap_or(0.0);
        if summary.is_empty() {
            outcome = Outcome::Bounded;
            summary = format!("research on {query:?} made no progress");
        }

        metadata.duration_ms = started.elapsed().as_millis() as u64;

        Ok(InstrumentResult {
            findings,
            summary,
            confidence,
            outcome,
            discrepancy,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;
    use crate::tools::Tool;
    use crate::types::{Preferences, RequestContext};
    use anyhow::Result;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    /// Reasoner whose analyze confidence climbs a scripted ramp.
    struct RampReasoner {
        ramp: Vec<f64>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Tool for RampReasoner {
        fn name(&self) -> &str {
            "ramp"
        }

        fn capabilities(&self) -> &[&'static str] {
            &[caps::REASONING]
        }

        async fn call(&self, _capability: &str, input: Value) -> Result<Value, LoopError> {
            if input["mode"] == "hypothesize" {
                return Ok(json!({"text": "test hypothesis", "confidence": 0.5}));
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let confidence = self.ramp.get(n).copied().unwrap_or(0.95);
            Ok(json!({"text": format!("analysis {n}"), "confidence": confidence}))
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    struct StaticSearch;

    #[async_trait]
    impl Tool for StaticSearch {
        fn name(&self) -> &str {
            "static-search"
        }

        fn capabilities(&self) -> &[&'static str] {
            &[caps::WEB_SEARCH]
        }

        async fn call(&self, _capability: &str, input: Value) -> Result<Value, LoopError> {
            let q = input["query"].as_str().unwrap_or("");
            Ok(json!({"results": [
                {"title": "result", "url": format!("https://example.com/{}", q.len()), "snippet": "evidence"}
            ]}))
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FailingSearch;

    #[async_trait]
    impl Tool for FailingSearch {
        fn name(&self) -> &str {
            "failing-search"
        }

        fn capabilities(&self) -> &[&'static str] {
            &[caps::WEB_SEARCH]
        }

        async fn call(&self, _capability: &str, _input: Value) -> Result<Value, LoopError> {
            Err(LoopError::Tool {
                tool: "failing-search".to_string(),
                message: "timeout".to_string(),
            })
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn ctx() -> TaskContext {
        TaskContext::new(
            "t1",
            Uuid::new_v4(),
            None,
            &RequestContext::default(),
            None,
            Preferences::default(),
            3,
        )
    }

    fn registry(ramp: Vec<f64>, search_ok: bool) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(RampReasoner {
            ramp,
            calls: AtomicU32::new(0),
        }));
        if search_ok {
            registry.register(Arc::new(StaticSearch));
        } else {
            registry.register(Arc::new(FailingSearch));
        }
        registry
    }

    #[tokio::test]
    async fn loop_completes_when_confidence_clears_threshold() {
        let research = ResearchInstrument::new(
            &registry(vec![0.4, 0.9], true),
            TerminationConfig::default(),
        )
        .unwrap();
        let result = research.execute("hiking trails", &ctx()).await.unwrap();
        assert_eq!(result.outcome, Outcome::Complete);
        assert_eq!(result.metadata.iterations, 2);
        assert!(!result.findings.is_empty());
        assert!(!result.summary.is_empty());
        assert!(!result.metadata.sources_consulted.is_empty());
    }

    #[tokio::test]
    async fn loop_is_bounded_by_max_iterations() {
        let research = ResearchInstrument::new(
            &registry(vec![0.1, 0.2, 0.3, 0.35, 0.4, 0.45], true),
            TerminationConfig::default(),
        )
        .unwrap();
        let result = research.execute("unanswerable", &ctx()).await.unwrap();
        assert_eq!(result.outcome, Outcome::Bounded);
        assert_eq!(result.metadata.iterations, DEFAULT_MAX_ITERATIONS);
    }

    #[tokio::test]
    async fn search_failure_degrades_into_synthetic_findings() {
        let research = ResearchInstrument::new(
            &registry(vec![0.9], false),
            TerminationConfig::default(),
        )
        .unwrap();
        let result = research.execute("anything", &ctx()).await.unwrap();
        // The loop survived the broken tool and still terminated.
        assert_eq!(result.outcome, Outcome::Complete);
        assert!(
            result
                .findings
                .iter()
                .any(|f| f.content.contains("search unavailable")),
        );
        assert!(result.metadata.sources_consulted.is_empty());
    }

    #[tokio::test]
    async fn max_iteration_override_is_honored() {
        let research = ResearchInstrument::new(
            &registry(vec![0.1, 0.2, 0.3, 0.4, 0.5], true),
            TerminationConfig::default(),
        )
        .unwrap();
        let mut context = ctx();
        context.overrides.max_iterations = Some(2);
        let result = research.execute("short budget", &context).await.unwrap();
        assert_eq!(result.metadata.iterations, 2);
        assert_eq!(result.outcome, Outcome::Bounded);
    }

    #[tokio::test]
    async fn cancellation_observed_at_iteration_boundary() {
        let research = ResearchInstrument::new(
            &registry(vec![0.1, 0.2, 0.3], true),
            TerminationConfig::default(),
        )
        .unwrap();
        let context = ctx();
        context.cancel.cancel();
        let err = research.execute("cancelled", &context).await.unwrap_err();
        assert!(matches!(err, LoopError::Cancelled));
    }
}
