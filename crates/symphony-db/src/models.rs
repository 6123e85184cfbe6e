use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    AwaitingApproval,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never transition again; their rows and events
    /// are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Terminal classification of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Confidence threshold reached.
    Complete,
    /// No further progress over the evaluation window.
    Saturated,
    /// Iteration or depth budget exhausted.
    Bounded,
    /// Unresolved contradiction in the findings.
    Inconclusive,
}

impl Outcome {
    /// Outcomes that count as a success for trust accounting.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Complete | Self::Saturated)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Complete => "complete",
            Self::Saturated => "saturated",
            Self::Bounded => "bounded",
            Self::Inconclusive => "inconclusive",
        };
        f.write_str(s)
    }
}

impl FromStr for Outcome {
    type Err = OutcomeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete" => Ok(Self::Complete),
            "saturated" => Ok(Self::Saturated),
            "bounded" => Ok(Self::Bounded),
            "inconclusive" => Ok(Self::Inconclusive),
            other => Err(OutcomeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Outcome`] string.
#[derive(Debug, Clone)]
pub struct OutcomeParseError(pub String);

impl fmt::Display for OutcomeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid outcome: {:?}", self.0)
    }
}

impl std::error::Error for OutcomeParseError {}

// ---------------------------------------------------------------------------

/// Observability classification of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    /// Invisible single-shot work.
    Autonomic,
    /// Summarized iterative work.
    SemiAutonomic,
    /// Fully streamed orchestration.
    Conscious,
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Autonomic => "autonomic",
            Self::SemiAutonomic => "semi_autonomic",
            Self::Conscious => "conscious",
        };
        f.write_str(s)
    }
}

impl FromStr for ProcessType {
    type Err = ProcessTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "autonomic" => Ok(Self::Autonomic),
            "semi_autonomic" => Ok(Self::SemiAutonomic),
            "conscious" => Ok(Self::Conscious),
            other => Err(ProcessTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ProcessType`] string.
#[derive(Debug, Clone)]
pub struct ProcessTypeParseError(pub String);

impl fmt::Display for ProcessTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid process type: {:?}", self.0)
    }
}

impl std::error::Error for ProcessTypeParseError {}

// ---------------------------------------------------------------------------

/// Status of a single heartbeat firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatRunStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl fmt::Display for HeartbeatRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for HeartbeatRunStatus {
    type Err = HeartbeatRunStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(HeartbeatRunStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`HeartbeatRunStatus`] string.
#[derive(Debug, Clone)]
pub struct HeartbeatRunStatusParseError(pub String);

impl fmt::Display for HeartbeatRunStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid heartbeat run status: {:?}", self.0)
    }
}

impl std::error::Error for HeartbeatRunStatusParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A registered client application. The `api_key` is the value presented
/// in the `X-Api-Key` header.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct App {
    pub id: Uuid,
    pub name: String,
    pub api_key: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A user of a client application, keyed by (app_id, external_user_id).
///
/// Carries the per-user trust metric columns so trust reads and updates
/// touch a single row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserProfile {
    pub id: Uuid,
    pub app_id: Uuid,
    pub external_user_id: String,
    pub display_name: Option<String>,
    pub total_tasks: i64,
    pub successful_tasks: i64,
    pub failed_tasks: i64,
    pub consecutive_successes: i64,
    pub current_trust_level: i16,
    pub last_task_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Trust metrics as surfaced by `GET /trust/metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustMetrics {
    pub total_tasks: i64,
    pub successful_tasks: i64,
    pub failed_tasks: i64,
    pub consecutive_successes: i64,
    pub current_trust_level: i16,
    pub last_task_at: Option<DateTime<Utc>>,
}

impl From<&UserProfile> for TrustMetrics {
    fn from(p: &UserProfile) -> Self {
        Self {
            total_tasks: p.total_tasks,
            successful_tasks: p.successful_tasks,
            failed_tasks: p.failed_tasks,
            consecutive_successes: p.consecutive_successes,
            current_trust_level: p.current_trust_level,
            last_task_at: p.last_task_at,
        }
    }
}

impl UserProfile {
    /// Success rate over all terminal tasks, 0.0 when none have run.
    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            self.successful_tasks as f64 / self.total_tasks as f64
        }
    }
}

/// A persisted task. The submitted request is stored verbatim as JSON so
/// polling can return it unmodified; the response is the serialized
/// terminal `TaskResponse`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskRow {
    pub id: String,
    pub app_id: Uuid,
    pub user_id: Option<String>,
    pub request: serde_json::Value,
    pub status: TaskStatus,
    pub outcome: Option<Outcome>,
    pub response: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One persisted loop iteration checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskIteration {
    pub id: i64,
    pub task_id: String,
    pub app_id: Uuid,
    pub iteration_num: i32,
    pub phase: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// A cron-scheduled recurring task template.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Heartbeat {
    pub id: Uuid,
    pub app_id: Uuid,
    pub user_id: Option<String>,
    pub name: String,
    pub query_template: String,
    pub cron_expression: String,
    pub timezone: String,
    pub context_template: Option<serde_json::Value>,
    pub webhook_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One firing of a heartbeat. `fire_minute` is the cron minute the run
/// was materialized for; a unique (heartbeat_id, fire_minute) pair is
/// what suppresses duplicate fires.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HeartbeatRun {
    pub id: Uuid,
    pub heartbeat_id: Uuid,
    pub app_id: Uuid,
    pub task_id: Option<String>,
    pub fire_minute: DateTime<Utc>,
    pub status: HeartbeatRunStatus,
    pub outcome: Option<Outcome>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A persisted, reusable composition specification.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SavedArrangement {
    pub id: Uuid,
    pub app_id: Uuid,
    pub name: String,
    pub spec: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A classified failure written to the error-learning store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ErrorRecord {
    pub id: i64,
    pub app_id: Option<Uuid>,
    pub task_id: Option<String>,
    pub kind: String,
    pub message: String,
    pub context: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A versioned knowledge entry, synced to sibling rooms as deltas.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub app_id: Uuid,
    pub version: i64,
    pub key: String,
    pub content: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// A record of one notification delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationRecord {
    pub id: i64,
    pub app_id: Uuid,
    pub task_id: String,
    pub channel: String,
    pub target: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Task counts by status for `GET /tasks/stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub pending: i64,
    pub awaiting_approval: i64,
    pub running: i64,
    pub complete: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Pending,
            TaskStatus::AwaitingApproval,
            TaskStatus::Running,
            TaskStatus::Complete,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        let result = "bogus".parse::<TaskStatus>();
        assert!(result.is_err());
    }

    #[test]
    fn task_status_terminal() {
        assert!(TaskStatus::Complete.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::AwaitingApproval.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn outcome_display_roundtrip() {
        let variants = [
            Outcome::Complete,
            Outcome::Saturated,
            Outcome::Bounded,
            Outcome::Inconclusive,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: Outcome = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn outcome_success_classification() {
        assert!(Outcome::Complete.is_success());
        assert!(Outcome::Saturated.is_success());
        assert!(!Outcome::Bounded.is_success());
        assert!(!Outcome::Inconclusive.is_success());
    }

    #[test]
    fn process_type_display_roundtrip() {
        let variants = [
            ProcessType::Autonomic,
            ProcessType::SemiAutonomic,
            ProcessType::Conscious,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: ProcessType = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn process_type_invalid() {
        let result = "subconscious".parse::<ProcessType>();
        assert!(result.is_err());
    }

    #[test]
    fn heartbeat_run_status_display_roundtrip() {
        let variants = [
            HeartbeatRunStatus::Pending,
            HeartbeatRunStatus::Running,
            HeartbeatRunStatus::Complete,
            HeartbeatRunStatus::Failed,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: HeartbeatRunStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn success_rate_handles_zero_tasks() {
        let profile = UserProfile {
            id: Uuid::new_v4(),
            app_id: Uuid::new_v4(),
            external_user_id: "u1".to_string(),
            display_name: None,
            total_tasks: 0,
            successful_tasks: 0,
            failed_tasks: 0,
            consecutive_successes: 0,
            current_trust_level: 0,
            last_task_at: None,
            created_at: Utc::now(),
        };
        assert_eq!(profile.success_rate(), 0.0);
    }
}
