//! The tool layer: capability-bearing external clients and the registry
//! that negotiates capabilities between tools and instruments.
//!
//! A tool is a black box behind the [`Tool`] trait. Instruments never
//! name tools; they declare capability strings and receive a resolved
//! [`ToolSet`] at construction. Tool instances are shared and must be
//! concurrency-safe; the registry is read-only after initialization.

pub mod claude;
pub mod tavily;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::error::LoopError;

/// Well-known capability tags.
pub mod caps {
    pub const REASONING: &str = "reasoning";
    pub const WEB_SEARCH: &str = "web_search";
    pub const VISION: &str = "vision";
    pub const SYNTHESIS: &str = "synthesis";
}

/// A capability-bearing external client.
///
/// `call` takes the capability being exercised plus a JSON payload and
/// returns a JSON payload. The payload shapes are a convention between
/// instruments and tool adapters:
///
/// - `reasoning`: `{prompt, mode}` -> `{text, confidence, sources?,
///   spawn?, contradiction?}`
/// - `web_search`: `{query}` -> `{results: [{title, url, snippet}]}`
/// - `vision`: `{prompt, images}` -> `{text, confidence}`
/// - `synthesis`: `{query, results}` -> `{summary, confidence,
///   discrepancy?}`
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> &[&'static str];

    fn version(&self) -> &str {
        "0.1.0"
    }

    async fn call(&self, capability: &str, input: Value) -> Result<Value, LoopError>;

    async fn health_check(&self) -> Result<()>;
}

// Compile-time assertion: Tool must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Tool) {}
};

/// Registry of shared tool instances, keyed by the capabilities they
/// expose.
///
/// Registration order is preserved: when several tools satisfy a
/// capability, the first registered wins. Callers must register in a
/// fixed order so resolution is deterministic across restarts.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        tracing::debug!(tool = tool.name(), caps = ?tool.capabilities(), "registered tool");
        self.tools.push(tool);
    }

    /// All tools exposing a capability, in registration order.
    pub fn get_by_capability(&self, capability: &str) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .filter(|t| t.capabilities().contains(&capability))
            .cloned()
            .collect()
    }

    /// Resolve an instrument's capability sets into a [`ToolSet`].
    ///
    /// Each required capability must resolve (first registered tool
    /// wins); any that cannot are reported together in a
    /// [`LoopError::Capability`]. Optional capabilities resolve
    /// best-effort.
    pub fn resolve(&self, required: &[&str], optional: &[&str]) -> Result<ToolSet, LoopError> {
        let mut by_cap = HashMap::new();
        let mut missing = Vec::new();

        for cap in required {
            match self.get_by_capability(cap).into_iter().next() {
                Some(tool) => {
                    by_cap.insert((*cap).to_string(), tool);
                }
                None => missing.push((*cap).to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(LoopError::Capability { missing });
        }

        for cap in optional {
            if let Some(tool) = self.get_by_capability(cap).into_iter().next() {
                by_cap.insert((*cap).to_string(), tool);
            }
        }

        Ok(ToolSet { by_cap })
    }

    /// Run every registered tool's health check concurrently.
    pub async fn health_check_all(&self) -> HashMap<String, Result<(), String>> {
        let checks = self.tools.iter().map(|tool| {
            let tool = Arc::clone(tool);
            async move {
                let result = tool.health_check().await.map_err(|e| format!("{e:#}"));
                (tool.name().to_string(), result)
            }
        });
        futures::future::join_all(checks).await.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("capabilities", &self.by_cap.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The capability -> tool map an instrument executes with.
#[derive(Clone, Default)]
pub struct ToolSet {
    by_cap: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn get(&self, capability: &str) -> Option<&Arc<dyn Tool>> {
        self.by_cap.get(capability)
    }

    pub fn has(&self, capability: &str) -> bool {
        self.by_cap.contains_key(capability)
    }

    /// Call the tool bound to `capability`. Missing optional bindings
    /// surface as a [`LoopError::Tool`] the caller can recover from.
    pub async fn call(&self, capability: &str, input: Value) -> Result<Value, LoopError> {
        let tool = self.by_cap.get(capability).ok_or_else(|| LoopError::Tool {
            tool: capability.to_string(),
            message: "no tool bound to capability".to_string(),
        })?;
        tool.call(capability, input).await
    }
}
