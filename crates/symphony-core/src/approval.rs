//! Pending-plan storage for trust-0 tasks.
//!
//! A trust-0 submission is persisted as `awaiting_approval` and its
//! plan plus original request held here until `POST /task/{id}/approve`
//! releases it to the task manager (or a cancel discards it). A single
//! coarse mutex guards the map; contention is low.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::types::{TaskPlan, TaskRequest};

/// Everything needed to execute a task once its plan is approved.
#[derive(Debug, Clone)]
pub struct HeldPlan {
    pub app_id: Uuid,
    pub user_id: Option<String>,
    pub plan: TaskPlan,
    pub request: TaskRequest,
}

#[derive(Default)]
pub struct ApprovalStore {
    plans: Mutex<HashMap<String, HeldPlan>>,
}

impl ApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self, held: HeldPlan) {
        let mut plans = self.plans.lock().expect("approval store lock poisoned");
        plans.insert(held.plan.task_id.clone(), held);
    }

    /// Remove and return the held plan. Approval consumes the entry, so
    /// a double-approve finds nothing and falls through to the
    /// idempotent no-op path.
    pub fn take(&self, task_id: &str) -> Option<HeldPlan> {
        let mut plans = self.plans.lock().expect("approval store lock poisoned");
        plans.remove(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<HeldPlan> {
        let plans = self.plans.lock().expect("approval store lock poisoned");
        plans.get(task_id).cloned()
    }

    /// Discard a held plan (cancellation of an awaiting task).
    pub fn discard(&self, task_id: &str) -> bool {
        let mut plans = self.plans.lock().expect("approval store lock poisoned");
        plans.remove(task_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.plans.lock().expect("approval store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphony_db::models::ProcessType;

    fn held(task_id: &str) -> HeldPlan {
        HeldPlan {
            app_id: Uuid::new_v4(),
            user_id: None,
            plan: TaskPlan {
                task_id: task_id.to_string(),
                query: "q".to_string(),
                instrument: "research".to_string(),
                process_type: ProcessType::SemiAutonomic,
                estimated_iterations: 5,
                description: "plan".to_string(),
                requires_approval: true,
            },
            request: TaskRequest::from_query("q"),
        }
    }

    #[test]
    fn hold_take_roundtrip() {
        let store = ApprovalStore::new();
        store.hold(held("t1"));
        assert_eq!(store.len(), 1);

        let taken = store.take("t1").unwrap();
        assert_eq!(taken.plan.task_id, "t1");

        // Consumed: a second take finds nothing.
        assert!(store.take("t1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn discard_removes_without_returning() {
        let store = ApprovalStore::new();
        store.hold(held("t1"));
        assert!(store.discard("t1"));
        assert!(!store.discard("t1"));
    }
}
