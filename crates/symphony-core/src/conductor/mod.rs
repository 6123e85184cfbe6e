//! The conductor: task lifecycle, routing, trust gating, callback
//! injection, room delegation and terminal bookkeeping.
//!
//! Everything that executes re-enters through here. Instruments get
//! their callbacks (checkpoint, spawn, error recording) injected into
//! the context before execution; compositions receive the conductor by
//! reference; sub-task spawns loop back through [`Conductor::execute_instrument`]
//! with depth enforced at the spawn point.

pub mod routing;

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use symphony_db::models::{Outcome, TaskStatus};
use symphony_db::store::{NewErrorRecord, NewIteration, Store};

use crate::approval::{ApprovalStore, HeldPlan};
use crate::bus::{EventBus, TaskEvent};
use crate::composition::ArrangementSpec;
use crate::context::TaskContext;
use crate::error::LoopError;
use crate::instrument::InstrumentCatalog;
use crate::manager::TaskManager;
use crate::notify::{Notification, Notifier};
use crate::rooms::{PrivacyClassifier, Room, RoomClient, RoomRegistry};
use crate::termination::TerminationConfig;
use crate::trust::TrustTracker;
use crate::types::{FailoverEvent, InstrumentResult, TaskPlan, TaskRequest, TaskResponse};

/// Conductor tuning knobs.
#[derive(Debug, Clone)]
pub struct ConductorConfig {
    /// Spawn depth limit when the request does not set one.
    pub default_max_spawn_depth: u32,
    pub termination: TerminationConfig,
    /// Room id this server registers for itself.
    pub local_room_id: String,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            default_max_spawn_depth: 3,
            termination: TerminationConfig::default(),
            local_room_id: "local".to_string(),
        }
    }
}

/// What `POST /task` returns.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<TaskPlan>,
}

pub struct Conductor {
    store: Arc<dyn Store>,
    catalog: InstrumentCatalog,
    bus: Arc<EventBus>,
    manager: Arc<TaskManager>,
    trust: Arc<TrustTracker>,
    approvals: Arc<ApprovalStore>,
    rooms: Option<Arc<RoomRegistry>>,
    room_client: Option<Arc<RoomClient>>,
    privacy: Arc<dyn PrivacyClassifier>,
    notifiers: Vec<Arc<dyn Notifier>>,
    config: ConductorConfig,
}

impl Conductor {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: InstrumentCatalog,
        bus: Arc<EventBus>,
        manager: Arc<TaskManager>,
        trust: Arc<TrustTracker>,
        approvals: Arc<ApprovalStore>,
        privacy: Arc<dyn PrivacyClassifier>,
        config: ConductorConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            bus,
            manager,
            trust,
            approvals,
            rooms: None,
            room_client: None,
            privacy,
            notifiers: Vec::new(),
            config,
        }
    }

    /// Enable room delegation.
    pub fn with_rooms(mut self, rooms: Arc<RoomRegistry>, client: Arc<RoomClient>) -> Self {
        self.rooms = Some(rooms);
        self.room_client = Some(client);
        self
    }

    pub fn with_notifiers(mut self, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        self.notifiers = notifiers;
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    pub fn trust(&self) -> &Arc<TrustTracker> {
        &self.trust
    }

    pub fn rooms(&self) -> Option<&Arc<RoomRegistry>> {
        self.rooms.as_ref()
    }

    pub fn catalog(&self) -> &InstrumentCatalog {
        &self.catalog
    }

    // -----------------------------------------------------------------
    // Submission and the trust gate
    // -----------------------------------------------------------------

    /// Submit a task. Level 0 holds a plan for approval; levels 1 and 2
    /// start a supervised worker immediately.
    pub async fn submit(
        self: &Arc<Self>,
        app_id: Uuid,
        user_id: Option<String>,
        mut request: TaskRequest,
    ) -> Result<SubmitOutcome, LoopError> {
        if request.query.trim().is_empty() {
            return Err(LoopError::Validation("query must not be empty".to_string()));
        }

        let task_id = match request.id.clone() {
            Some(id) if !id.trim().is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };
        request.id = Some(task_id.clone());

        let instrument_name = routing::analyze_and_route(&request);
        if self.catalog.get(instrument_name).is_none() {
            return Err(LoopError::Internal(anyhow::anyhow!(
                "routed instrument {instrument_name:?} is not in the catalog"
            )));
        }

        let trust_level = self.effective_trust_level(app_id, user_id.as_deref(), &request).await?;
        let initial_status = if trust_level == 0 {
            TaskStatus::AwaitingApproval
        } else {
            TaskStatus::Pending
        };

        let stored_request = serde_json::to_value(&request)
            .context("failed to serialize request")
            .map_err(LoopError::Internal)?;
        self.store
            .insert_task(&symphony_db::store::NewTask {
                id: task_id.clone(),
                app_id,
                user_id: user_id.clone(),
                request: stored_request,
                status: initial_status,
            })
            .await
            .map_err(LoopError::Internal)?;

        info!(
            task_id = %task_id,
            instrument = instrument_name,
            trust_level = %trust_level,
            status = %initial_status,
            "task submitted"
        );

        if trust_level == 0 {
            let plan = self.build_plan(&task_id, instrument_name, &request);
            self.approvals.hold(HeldPlan {
                app_id,
                user_id,
                plan: plan.clone(),
                request,
            });
            return Ok(SubmitOutcome {
                task_id,
                status: TaskStatus::AwaitingApproval,
                plan: Some(plan),
            });
        }

        self.start_worker(app_id, user_id, task_id.clone(), request);
        Ok(SubmitOutcome {
            task_id,
            status: TaskStatus::Pending,
            plan: None,
        })
    }

    /// Approve a held trust-0 plan. Idempotent: approving a task that
    /// already left `awaiting_approval` reports its current status and
    /// changes nothing. Returns `None` for an unknown task.
    pub async fn approve(
        self: &Arc<Self>,
        app_id: Uuid,
        task_id: &str,
    ) -> Result<Option<SubmitOutcome>, LoopError> {
        let Some(task) = self
            .store
            .get_task(app_id, task_id)
            .await
            .map_err(LoopError::Internal)?
        else {
            return Ok(None);
        };

        if task.status != TaskStatus::AwaitingApproval {
            return Ok(Some(SubmitOutcome {
                task_id: task_id.to_string(),
                status: task.status,
                plan: None,
            }));
        }

        let won = self
            .store
            .transition_task(
                app_id,
                task_id,
                TaskStatus::AwaitingApproval,
                TaskStatus::Pending,
            )
            .await
            .map_err(LoopError::Internal)?
            == 1;
        if !won {
            // Raced with a cancel or another approve; report what stands.
            let status = self
                .store
                .get_task(app_id, task_id)
                .await
                .map_err(LoopError::Internal)?
                .map(|t| t.status)
                .unwrap_or(TaskStatus::Pending);
            return Ok(Some(SubmitOutcome {
                task_id: task_id.to_string(),
                status,
                plan: None,
            }));
        }

        // The held request survives restarts in the task row; the
        // in-memory plan is just the fast path.
        let (user_id, request) = match self.approvals.take(task_id) {
            Some(held) => (held.user_id, held.request),
            None => {
                let request: TaskRequest = serde_json::from_value(task.request.clone())
                    .context("stored request is not deserializable")
                    .map_err(LoopError::Internal)?;
                (task.user_id.clone(), request)
            }
        };

        info!(task_id = %task_id, "plan approved, executing");
        self.start_worker(app_id, user_id, task_id.to_string(), request);

        Ok(Some(SubmitOutcome {
            task_id: task_id.to_string(),
            status: TaskStatus::Pending,
            plan: None,
        }))
    }

    /// Cooperative cancel. Accepted in any non-terminal state; the
    /// transition to `cancelled` happens immediately for queued states
    /// and at the worker's next iteration boundary for running ones.
    pub async fn cancel(
        self: &Arc<Self>,
        app_id: Uuid,
        task_id: &str,
    ) -> Result<Option<TaskStatus>, LoopError> {
        let Some(task) = self
            .store
            .get_task(app_id, task_id)
            .await
            .map_err(LoopError::Internal)?
        else {
            return Ok(None);
        };

        match task.status {
            TaskStatus::AwaitingApproval => {
                let won = self
                    .store
                    .transition_task(
                        app_id,
                        task_id,
                        TaskStatus::AwaitingApproval,
                        TaskStatus::Cancelled,
                    )
                    .await
                    .map_err(LoopError::Internal)?
                    == 1;
                if won {
                    self.approvals.discard(task_id);
                    self.bus.emit(TaskEvent::cancelled(task_id));
                    return Ok(Some(TaskStatus::Cancelled));
                }
            }
            TaskStatus::Pending | TaskStatus::Running => {
                // Signal the worker; it observes at the next iteration
                // boundary and performs the terminal transition itself.
                self.manager.cancel(task_id);
            }
            _ => {}
        }

        let status = self
            .store
            .get_task(app_id, task_id)
            .await
            .map_err(LoopError::Internal)?
            .map(|t| t.status);
        Ok(status)
    }

    // -----------------------------------------------------------------
    // Worker
    // -----------------------------------------------------------------

    fn start_worker(
        self: &Arc<Self>,
        app_id: Uuid,
        user_id: Option<String>,
        task_id: String,
        request: TaskRequest,
    ) {
        let conductor = Arc::clone(self);
        let worker_task_id = task_id.clone();

        // Panic recovery: classify the task failed and emit the error
        // event, keeping the single-terminal invariant.
        let store = Arc::clone(&self.store);
        let bus = Arc::clone(&self.bus);
        let panic_task_id = task_id.clone();
        let on_panic = Box::pin(async move {
            let _ = store
                .finish_task(
                    app_id,
                    &panic_task_id,
                    TaskStatus::Running,
                    TaskStatus::Failed,
                    None,
                    None,
                    Some("worker panicked".to_string()),
                )
                .await;
            bus.emit(TaskEvent::error(&panic_task_id, "worker panicked"));
        });

        self.manager.submit(
            &task_id,
            app_id,
            move |cancel| {
                Box::pin(async move {
                    conductor
                        .run_task(app_id, user_id, worker_task_id, request, cancel)
                        .await;
                })
            },
            on_panic,
        );
    }

    async fn run_task(
        self: Arc<Self>,
        app_id: Uuid,
        user_id: Option<String>,
        task_id: String,
        request: TaskRequest,
        cancel: CancellationToken,
    ) {
        // Losing pending -> running means a cancel won the race.
        let won = match self
            .store
            .transition_task(app_id, &task_id, TaskStatus::Pending, TaskStatus::Running)
            .await
        {
            Ok(rows) => rows == 1,
            Err(e) => {
                warn!(task_id = %task_id, error = %format!("{e:#}"), "could not start task");
                false
            }
        };
        if !won {
            return;
        }

        self.bus.emit(TaskEvent::started(&task_id));

        let result = self
            .execute_routed(app_id, user_id.as_deref(), &task_id, &request, cancel)
            .await;

        match result {
            Ok(instrument_result) => {
                let outcome = instrument_result.outcome;
                let response = self.build_response(&task_id, &request, instrument_result);
                let response_json = serde_json::to_value(&response).unwrap_or(json!({}));

                let recorded = self
                    .store
                    .finish_task(
                        app_id,
                        &task_id,
                        TaskStatus::Running,
                        TaskStatus::Complete,
                        Some(outcome),
                        Some(response_json),
                        None,
                    )
                    .await;
                if let Err(e) = recorded {
                    warn!(task_id = %task_id, error = %format!("{e:#}"), "failed to persist terminal response");
                }

                self.bus.emit(TaskEvent::complete(
                    &task_id,
                    outcome,
                    response.summary.clone(),
                    response.confidence,
                ));
                self.record_trust(app_id, user_id.as_deref(), Some(outcome)).await;
                self.notify(app_id, &task_id, &request, &response).await;
                info!(task_id = %task_id, outcome = %outcome, "task complete");
            }
            Err(LoopError::Cancelled) => {
                let _ = self
                    .store
                    .finish_task(
                        app_id,
                        &task_id,
                        TaskStatus::Running,
                        TaskStatus::Cancelled,
                        None,
                        None,
                        None,
                    )
                    .await;
                self.bus.emit(TaskEvent::cancelled(&task_id));
                self.record_trust(app_id, user_id.as_deref(), None).await;
                info!(task_id = %task_id, "task cancelled");
            }
            Err(e) => {
                let detail = format!("{e}");
                let _ = self
                    .store
                    .record_error(&NewErrorRecord {
                        app_id: Some(app_id),
                        task_id: Some(task_id.clone()),
                        kind: e.kind().to_string(),
                        message: detail.clone(),
                        context: None,
                    })
                    .await;
                let _ = self
                    .store
                    .finish_task(
                        app_id,
                        &task_id,
                        TaskStatus::Running,
                        TaskStatus::Failed,
                        None,
                        None,
                        Some(detail.clone()),
                    )
                    .await;
                self.bus.emit(TaskEvent::error(&task_id, detail));
                self.record_trust(app_id, user_id.as_deref(), None).await;
                warn!(task_id = %task_id, kind = e.kind(), "task failed");
            }
        }
    }

    // -----------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------

    /// Route and execute with room selection and failover.
    async fn execute_routed(
        self: &Arc<Self>,
        app_id: Uuid,
        user_id: Option<&str>,
        task_id: &str,
        request: &TaskRequest,
        cancel: CancellationToken,
    ) -> Result<InstrumentResult, LoopError> {
        let instrument_name = routing::analyze_and_route(request);

        let mut ctx = TaskContext::new(
            task_id,
            app_id,
            user_id.map(str::to_owned),
            &request.context,
            request.intent.clone(),
            request.preferences.clone(),
            request
                .preferences
                .max_spawn_depth
                .unwrap_or(self.config.default_max_spawn_depth),
        );
        ctx.cancel = cancel;
        self.attach_callbacks(&mut ctx, app_id, task_id);

        let mut failovers: Vec<FailoverEvent> = Vec::new();

        // Room selection: best room for the instrument at the request's
        // privacy level. A remote failure logs a failover event and
        // falls back to local execution.
        if let (Some(rooms), Some(client)) = (&self.rooms, &self.room_client) {
            let privacy = self.privacy.classify(request);
            let required = self
                .catalog
                .get(instrument_name)
                .map(|i| i.spec().required_capabilities.clone())
                .unwrap_or_default();

            if let Some(room) = rooms.best_room(&required, privacy) {
                if !room.is_local {
                    match client.delegate(&room, request).await {
                        Ok(mut result) => {
                            result.metadata.room_id = Some(room.room_id.clone());
                            return Ok(result);
                        }
                        Err(LoopError::Delegation(message)) => {
                            warn!(
                                task_id = %task_id,
                                room_id = %room.room_id,
                                error = %message,
                                "delegation failed, falling back to local execution"
                            );
                            failovers.push(FailoverEvent {
                                room_id: room.room_id.clone(),
                                error: message,
                                ts: chrono::Utc::now(),
                            });
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        let mut result = self
            .execute_instrument(instrument_name, &request.query, &ctx)
            .await?;

        if self.rooms.is_some() {
            result.metadata.room_id = Some(self.config.local_room_id.clone());
        }
        result.metadata.failover_events.extend(failovers);
        Ok(result)
    }

    /// Execute a named instrument against a prepared context. This is
    /// the re-entry point for compositions and sub-task spawns.
    pub async fn execute_instrument(
        &self,
        name: &str,
        query: &str,
        ctx: &TaskContext,
    ) -> Result<InstrumentResult, LoopError> {
        let instrument = self
            .catalog
            .get(name)
            .ok_or_else(|| LoopError::Validation(format!("unknown instrument {name:?}")))?;
        instrument.execute(query, ctx).await
    }

    /// Execute a composition specification against a prepared context.
    pub async fn execute_arrangement(
        self: &Arc<Self>,
        spec: &ArrangementSpec,
        query: &str,
        ctx: &TaskContext,
    ) -> Result<InstrumentResult, LoopError> {
        let composition = spec.build();
        composition.execute(query, ctx, self).await
    }

    /// Route a sub-query (spawn path): depth is enforced here, at the
    /// spawn point, before any instrument code runs.
    async fn execute_spawned(
        self: &Arc<Self>,
        sub_query: String,
        parent: TaskContext,
    ) -> Result<InstrumentResult, LoopError> {
        let depth = parent.depth + 1;
        if depth > parent.max_depth {
            return Err(LoopError::DepthExceeded {
                depth,
                max_depth: parent.max_depth,
            });
        }
        parent.check_cancelled()?;

        let sub_request = TaskRequest::from_query(sub_query.clone());
        let instrument_name = routing::analyze_and_route(&sub_request);
        let sub_ctx = parent.child(Vec::new());
        self.execute_instrument(instrument_name, &sub_query, &sub_ctx)
            .await
    }

    /// Delegate one cross-room branch. Local rooms execute in-process.
    pub async fn delegate_branch(
        self: &Arc<Self>,
        room_id: &str,
        sub_query: &str,
        ctx: &TaskContext,
    ) -> Result<InstrumentResult, LoopError> {
        let rooms = self
            .rooms
            .as_ref()
            .ok_or_else(|| LoopError::Delegation("no room registry configured".to_string()))?;
        let room: Room = rooms
            .get(room_id)
            .ok_or_else(|| LoopError::Delegation(format!("unknown room {room_id:?}")))?;

        if room.is_local {
            let sub_request = TaskRequest::from_query(sub_query);
            let name = routing::analyze_and_route(&sub_request);
            let sub_ctx = ctx.child(Vec::new());
            return self.execute_instrument(name, sub_query, &sub_ctx).await;
        }

        let client = self
            .room_client
            .as_ref()
            .ok_or_else(|| LoopError::Delegation("no room client configured".to_string()))?;
        let sub_request = TaskRequest::from_query(sub_query);
        client.delegate(&room, &sub_request).await
    }

    fn attach_callbacks(self: &Arc<Self>, ctx: &mut TaskContext, app_id: Uuid, task_id: &str) {
        // Checkpoint: persist the iteration row and emit the event. The
        // persisted iteration number comes from a per-task counter, not
        // the instrument's local count, so checkpoints stay strictly
        // increasing and gapless across composition steps.
        let store = Arc::clone(&self.store);
        let bus = Arc::clone(&self.bus);
        let cp_task_id = task_id.to_string();
        let counter = Arc::new(std::sync::atomic::AtomicI32::new(0));
        ctx.checkpoint_fn = Some(Arc::new(move |cp| {
            let store = Arc::clone(&store);
            let bus = Arc::clone(&bus);
            let task_id = cp_task_id.clone();
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                let iteration_num =
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                store
                    .insert_iteration(&NewIteration {
                        task_id: task_id.clone(),
                        app_id,
                        iteration_num,
                        phase: cp.phase.clone(),
                        input: cp.input.clone(),
                        output: cp.output.clone(),
                        duration_ms: cp.duration_ms as i64,
                    })
                    .await
                    .map_err(LoopError::Internal)?;
                bus.emit(TaskEvent::iteration(
                    &task_id,
                    iteration_num as u32,
                    cp.phase,
                    cp.duration_ms,
                    cp.output,
                ));
                Ok(())
            })
        }));

        // Spawn: re-enter the conductor with the depth check up front.
        let conductor = Arc::clone(self);
        ctx.spawn_fn = Some(Arc::new(move |sub_query, parent| {
            let conductor = Arc::clone(&conductor);
            Box::pin(async move { conductor.execute_spawned(sub_query, parent).await })
        }));

        // Error learning.
        let store = Arc::clone(&self.store);
        let err_task_id = task_id.to_string();
        ctx.record_error_fn = Some(Arc::new(move |kind, message| {
            let store = Arc::clone(&store);
            let task_id = err_task_id.clone();
            Box::pin(async move {
                if let Err(e) = store
                    .record_error(&NewErrorRecord {
                        app_id: Some(app_id),
                        task_id: Some(task_id),
                        kind,
                        message,
                        context: None,
                    })
                    .await
                {
                    warn!(error = %format!("{e:#}"), "failed to record error");
                }
            })
        }));
    }

    // -----------------------------------------------------------------
    // Terminal bookkeeping
    // -----------------------------------------------------------------

    fn build_plan(&self, task_id: &str, instrument_name: &str, request: &TaskRequest) -> TaskPlan {
        let estimated_iterations = self
            .catalog
            .get(instrument_name)
            .map(|i| i.spec().max_iterations)
            .unwrap_or(1);
        TaskPlan {
            task_id: task_id.to_string(),
            query: request.query.clone(),
            instrument: instrument_name.to_string(),
            process_type: routing::process_type_for(instrument_name),
            estimated_iterations,
            description: format!(
                "Run the {instrument_name} instrument for up to {estimated_iterations} \
                 iteration(s) to answer: {}",
                request.query
            ),
            requires_approval: true,
        }
    }

    fn build_response(
        &self,
        task_id: &str,
        request: &TaskRequest,
        result: InstrumentResult,
    ) -> TaskResponse {
        let suggested_followups = suggested_followups(request, &result);
        TaskResponse {
            request_id: task_id.to_string(),
            summary: result.summary,
            confidence: result.confidence,
            outcome: result.outcome,
            findings: result.findings,
            discrepancy: result.discrepancy,
            metadata: result.metadata,
            suggested_followups,
        }
    }

    async fn effective_trust_level(
        &self,
        app_id: Uuid,
        user_id: Option<&str>,
        request: &TaskRequest,
    ) -> Result<i16, LoopError> {
        if let Some(level) = request.preferences.trust_level {
            if !(0..=2).contains(&level) {
                return Err(LoopError::Validation(format!(
                    "trust_level must be 0, 1 or 2, got {level}"
                )));
            }
            return Ok(level);
        }
        match user_id {
            Some(user_id) => {
                let profile = self
                    .store
                    .ensure_user_profile(app_id, user_id)
                    .await
                    .map_err(LoopError::Internal)?;
                Ok(profile.current_trust_level)
            }
            None => Ok(1),
        }
    }

    async fn record_trust(&self, app_id: Uuid, user_id: Option<&str>, outcome: Option<Outcome>) {
        if let Some(user_id) = user_id {
            if let Err(e) = self.trust.record_outcome(app_id, user_id, outcome).await {
                warn!(error = %format!("{e:#}"), "failed to record trust outcome");
            }
        }
    }

    async fn notify(
        &self,
        app_id: Uuid,
        task_id: &str,
        request: &TaskRequest,
        response: &TaskResponse,
    ) {
        if !request.preferences.notify_on_complete || self.notifiers.is_empty() {
            return;
        }
        let notification = Notification {
            task_id: task_id.to_string(),
            summary: response.summary.clone(),
            outcome: Some(response.outcome),
        };
        for notifier in &self.notifiers {
            let status = match notifier.notify(&notification).await {
                Ok(()) => "sent",
                Err(e) => {
                    warn!(channel = notifier.channel(), error = %format!("{e:#}"), "notification failed");
                    "failed"
                }
            };
            let _ = self
                .store
                .record_notification(app_id, task_id, notifier.channel(), notifier.target(), status)
                .await;
        }
    }
}

/// Deterministic followup suggestions; some carry routing prefixes the
/// client renders specially.
fn suggested_followups(request: &TaskRequest, result: &InstrumentResult) -> Vec<String> {
    let mut followups = Vec::new();

    match result.outcome {
        Outcome::Complete => {
            if result.metadata.instrument_used == "research" {
                followups.push(
                    "[proactive] Schedule a heartbeat to keep this answer fresh".to_string(),
                );
            }
            followups.push("Ask for more depth on any individual finding".to_string());
        }
        Outcome::Saturated => {
            followups.push(
                "[scoping] The loop stopped making progress; a narrower question may go further"
                    .to_string(),
            );
        }
        Outcome::Bounded => {
            followups.push(
                "[scoping] The iteration budget ran out; split the question or raise thoroughness"
                    .to_string(),
            );
        }
        Outcome::Inconclusive => {
            followups.push(
                "[education] The sources conflicted; ask for the evidence behind each side"
                    .to_string(),
            );
        }
    }

    if result.confidence < 0.5 {
        followups.push(
            "[pushback] Confidence is low; add context or rephrase before acting on this"
                .to_string(),
        );
    }
    if request.context.goal.is_none() && result.outcome != Outcome::Complete {
        followups.push("Tell me the underlying goal so I can aim the next loop".to_string());
    }

    followups
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphony_db::models::ProcessType;
    use crate::types::{ExecutionMetadata, Finding};

    fn result_with(outcome: Outcome, confidence: f64, instrument: &str) -> InstrumentResult {
        InstrumentResult {
            findings: vec![Finding::new("f", confidence)],
            summary: "s".to_string(),
            confidence,
            outcome,
            discrepancy: None,
            metadata: ExecutionMetadata::new(instrument, ProcessType::SemiAutonomic),
        }
    }

    #[test]
    fn followups_carry_expected_prefixes() {
        let request = TaskRequest::from_query("q");

        let complete = suggested_followups(&request, &result_with(Outcome::Complete, 0.9, "research"));
        assert!(complete.iter().any(|f| f.starts_with("[proactive]")));

        let bounded = suggested_followups(&request, &result_with(Outcome::Bounded, 0.3, "note"));
        assert!(bounded.iter().any(|f| f.starts_with("[scoping]")));
        assert!(bounded.iter().any(|f| f.starts_with("[pushback]")));

        let inconclusive =
            suggested_followups(&request, &result_with(Outcome::Inconclusive, 0.6, "synthesis"));
        assert!(inconclusive.iter().any(|f| f.starts_with("[education]")));
    }
}
