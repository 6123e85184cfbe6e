//! The runtime task envelope.
//!
//! [`TaskContext`] is what instruments execute against. It carries the
//! request data plus runtime-only callbacks injected by the conductor:
//! checkpoint persistence, sub-task spawning and error recording. The
//! callbacks resolve the conductor <-> instrument cycle -- instruments
//! depend on this shape only, never on the conductor type -- and are
//! never serialized.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::LoopError;
use crate::types::{Attachment, Intent, InstrumentResult, Preferences, RequestContext};

/// Data handed to the checkpoint callback once per iteration.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub iteration_num: u32,
    pub phase: String,
    pub input: Value,
    pub output: Value,
    pub duration_ms: u64,
}

/// Persists an iteration checkpoint and emits the `iteration` event.
pub type CheckpointFn =
    Arc<dyn Fn(Checkpoint) -> BoxFuture<'static, Result<(), LoopError>> + Send + Sync>;

/// Re-enters the conductor with a sub-query. Depth accounting and the
/// depth limit live behind this callback.
pub type SpawnFn = Arc<
    dyn Fn(String, TaskContext) -> BoxFuture<'static, Result<InstrumentResult, LoopError>>
        + Send
        + Sync,
>;

/// Writes a classified failure to the error-learning store.
pub type RecordErrorFn = Arc<dyn Fn(String, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Per-execution instrument overrides, applied by sequential composition
/// steps and restored afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstrumentOverrides {
    pub max_iterations: Option<u32>,
    pub confidence_threshold: Option<f64>,
}

/// Runtime envelope for one instrument execution.
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub app_id: Uuid,
    pub user_id: Option<String>,
    pub conversation_summary: Option<String>,
    pub attachments: Vec<Attachment>,
    pub location: Option<String>,
    pub goal: Option<String>,
    pub intent: Option<Intent>,
    pub preferences: Preferences,
    /// Upstream results for synthesis and sequential pipelines.
    pub input_results: Vec<InstrumentResult>,
    /// Current recursion depth; incremented by the spawn callback.
    pub depth: u32,
    /// Spawn limit; `depth > max_depth` fails the spawn.
    pub max_depth: u32,
    pub overrides: InstrumentOverrides,
    pub cancel: CancellationToken,
    pub checkpoint_fn: Option<CheckpointFn>,
    pub spawn_fn: Option<SpawnFn>,
    pub record_error_fn: Option<RecordErrorFn>,
}

impl TaskContext {
    /// Build a context from the request envelope. Callbacks start empty;
    /// the conductor attaches them before execution.
    pub fn new(
        task_id: impl Into<String>,
        app_id: Uuid,
        user_id: Option<String>,
        request_context: &RequestContext,
        intent: Option<Intent>,
        preferences: Preferences,
        max_depth: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            app_id,
            user_id,
            conversation_summary: request_context.conversation_summary.clone(),
            attachments: request_context.attachments.clone(),
            location: request_context.location.clone(),
            goal: request_context.goal.clone(),
            intent,
            preferences,
            input_results: request_context.input_results.clone(),
            depth: 0,
            max_depth,
            overrides: InstrumentOverrides::default(),
            cancel: CancellationToken::new(),
            checkpoint_fn: None,
            spawn_fn: None,
            record_error_fn: None,
        }
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative cancellation check, called at every iteration
    /// boundary and spawn point.
    pub fn check_cancelled(&self) -> Result<(), LoopError> {
        if self.cancelled() {
            Err(LoopError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Persist an iteration checkpoint. A context without the callback
    /// (sub-tasks, bare tests) skips persistence silently.
    pub async fn checkpoint(&self, cp: Checkpoint) -> Result<(), LoopError> {
        match &self.checkpoint_fn {
            Some(f) => f(cp).await,
            None => Ok(()),
        }
    }

    /// Spawn a bounded sub-task through the conductor.
    pub async fn spawn(&self, sub_query: impl Into<String>) -> Result<InstrumentResult, LoopError> {
        self.check_cancelled()?;
        match &self.spawn_fn {
            Some(f) => f(sub_query.into(), self.clone()).await,
            None => Err(LoopError::Validation(
                "sub-task spawning is not available in this context".to_string(),
            )),
        }
    }

    /// Report a recovered failure to the error-learning store.
    pub async fn record_error(&self, kind: &str, message: impl Into<String>) {
        if let Some(f) = &self.record_error_fn {
            f(kind.to_string(), message.into()).await;
        }
    }

    /// Derive the context handed to a spawned sub-task: depth advanced,
    /// parent checkpointing detached (sub-results are embedded in the
    /// parent, they do not own checkpoint rows).
    pub fn child(&self, input_results: Vec<InstrumentResult>) -> Self {
        let mut child = self.clone();
        child.depth += 1;
        child.checkpoint_fn = None;
        child.input_results = input_results;
        child.overrides = InstrumentOverrides::default();
        child
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("app_id", &self.app_id)
            .field("depth", &self.depth)
            .field("max_depth", &self.max_depth)
            .field("input_results", &self.input_results.len())
            .field("has_checkpoint_fn", &self.checkpoint_fn.is_some())
            .field("has_spawn_fn", &self.spawn_fn.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_context() -> TaskContext {
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

    #[tokio::test]
    async fn checkpoint_without_callback_is_noop() {
        let ctx = bare_context();
        ctx.checkpoint(Checkpoint {
            iteration_num: 1,
            phase: "analysis".to_string(),
            input: serde_json::json!({}),
            output: serde_json::json!({}),
            duration_ms: 0,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn spawn_without_callback_is_rejected() {
        let ctx = bare_context();
        let err = ctx.spawn("sub").await.unwrap_err();
        assert!(matches!(err, LoopError::Validation(_)));
    }

    #[test]
    fn child_advances_depth_and_drops_checkpointing() {
        let ctx = bare_context();
        let child = ctx.child(Vec::new());
        assert_eq!(child.depth, ctx.depth + 1);
        assert!(child.checkpoint_fn.is_none());
    }

    #[tokio::test]
    async fn cancelled_context_rejects_spawn() {
        let ctx = bare_context();
        ctx.cancel.cancel();
        let err = ctx.spawn("sub").await.unwrap_err();
        assert!(matches!(err, LoopError::Cancelled));
    }
}
