//! Task status transitions.
//!
//! Validates and executes status transitions through the store,
//! enforcing the allowed transition graph and optimistic locking. The
//! store predicate includes the expected current status, so exactly one
//! of any set of racing terminal writers wins.

use anyhow::{Result, bail};
use uuid::Uuid;

use symphony_db::models::TaskStatus;
use symphony_db::store::Store;

/// The task state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// awaiting_approval -> pending    (approve)
/// awaiting_approval -> cancelled
/// pending           -> running
/// pending           -> cancelled
/// running           -> complete
/// running           -> failed
/// running           -> cancelled
/// ```
pub struct TaskLifecycle;

impl TaskLifecycle {
    /// Check whether `from -> to` is an edge in the state graph.
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        matches!(
            (from, to),
            (TaskStatus::AwaitingApproval, TaskStatus::Pending)
                | (TaskStatus::AwaitingApproval, TaskStatus::Cancelled)
                | (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Running, TaskStatus::Complete)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Cancelled)
        )
    }

    /// Execute a transition with optimistic locking.
    ///
    /// Returns an error if the transition is not legal, the task does
    /// not exist, or the current status no longer matches `from`.
    pub async fn transition(
        store: &dyn Store,
        app_id: Uuid,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<()> {
        if !Self::is_valid_transition(from, to) {
            bail!(
                "invalid state transition: {} -> {} for task {}",
                from,
                to,
                task_id
            );
        }

        let rows = store.transition_task(app_id, task_id, from, to).await?;
        if rows == 0 {
            let task = store.get_task(app_id, task_id).await?;
            match task {
                None => bail!("task {} not found", task_id),
                Some(t) => bail!(
                    "optimistic lock failed: task {} has status {}, expected {}",
                    task_id,
                    t.status,
                    from
                ),
            }
        }

        Ok(())
    }

    /// Like [`Self::transition`] but quiet about races: returns whether
    /// the transition won. Used where losing the race is expected
    /// behavior (e.g. a worker starting a task that was just cancelled).
    pub async fn try_transition(
        store: &dyn Store,
        app_id: Uuid,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<bool> {
        if !Self::is_valid_transition(from, to) {
            bail!(
                "invalid state transition: {} -> {} for task {}",
                from,
                to,
                task_id
            );
        }
        let rows = store.transition_task(app_id, task_id, from, to).await?;
        Ok(rows == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use symphony_db::mem::MemStore;
    use symphony_db::store::NewTask;

    #[test]
    fn transition_graph_edges() {
        use TaskStatus::*;
        assert!(TaskLifecycle::is_valid_transition(AwaitingApproval, Pending));
        assert!(TaskLifecycle::is_valid_transition(Pending, Running));
        assert!(TaskLifecycle::is_valid_transition(Running, Complete));
        assert!(TaskLifecycle::is_valid_transition(Running, Failed));
        assert!(TaskLifecycle::is_valid_transition(Running, Cancelled));
        assert!(TaskLifecycle::is_valid_transition(Pending, Cancelled));
        assert!(TaskLifecycle::is_valid_transition(AwaitingApproval, Cancelled));

        // Terminal states never leave.
        assert!(!TaskLifecycle::is_valid_transition(Complete, Running));
        assert!(!TaskLifecycle::is_valid_transition(Failed, Pending));
        assert!(!TaskLifecycle::is_valid_transition(Cancelled, Running));
        // No skipping the queue.
        assert!(!TaskLifecycle::is_valid_transition(AwaitingApproval, Running));
        assert!(!TaskLifecycle::is_valid_transition(Pending, Complete));
    }

    #[tokio::test]
    async fn transition_moves_the_row() {
        let store = MemStore::new();
        let app_id = Uuid::new_v4();
        store
            .insert_task(&NewTask {
                id: "t1".to_string(),
                app_id,
                user_id: None,
                request: json!({}),
                status: TaskStatus::Pending,
            })
            .await
            .unwrap();

        TaskLifecycle::transition(&store, app_id, "t1", TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap();
        let task = store.get_task(app_id, "t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn losing_the_race_reports_the_actual_status() {
        let store = MemStore::new();
        let app_id = Uuid::new_v4();
        store
            .insert_task(&NewTask {
                id: "t1".to_string(),
                app_id,
                user_id: None,
                request: json!({}),
                status: TaskStatus::Pending,
            })
            .await
            .unwrap();

        TaskLifecycle::transition(&store, app_id, "t1", TaskStatus::Pending, TaskStatus::Cancelled)
            .await
            .unwrap();

        let err = TaskLifecycle::transition(
            &store,
            app_id,
            "t1",
            TaskStatus::Pending,
            TaskStatus::Running,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("optimistic lock failed"));

        let won = TaskLifecycle::try_transition(
            &store,
            app_id,
            "t1",
            TaskStatus::Pending,
            TaskStatus::Running,
        )
        .await
        .unwrap();
        assert!(!won);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected_before_the_store() {
        let store = MemStore::new();
        let err = TaskLifecycle::transition(
            &store,
            Uuid::new_v4(),
            "t1",
            TaskStatus::Complete,
            TaskStatus::Running,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("invalid state transition"));
    }
}
