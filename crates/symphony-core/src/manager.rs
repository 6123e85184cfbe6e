//! Background task supervision.
//!
//! The task manager is the only component that spawns long-lived
//! workers. Each worker runs under a panic guard: a panicking worker
//! triggers the caller-supplied recovery future (which classifies the
//! task as failed and emits the error event) and the manager itself
//! never crashes. Cancellation is a per-task token observed
//! cooperatively by the worker.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

const RECENT_CAP: usize = 256;

/// A currently running worker.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveTask {
    pub task_id: String,
    pub app_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// A finished worker, kept in a bounded ring for `get_recent`.
#[derive(Debug, Clone, Serialize)]
pub struct FinishedTask {
    pub task_id: String,
    pub app_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Manager-level counters for the system health surface.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub active: usize,
    pub spawned_total: u64,
    pub panicked_total: u64,
}

struct Entry {
    app_id: Uuid,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct TaskManager {
    active: Mutex<HashMap<String, Entry>>,
    recent: Mutex<VecDeque<FinishedTask>>,
    spawned_total: AtomicU64,
    panicked_total: AtomicU64,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a supervised worker for a task.
    ///
    /// `worker` receives the task's cancellation token and must observe
    /// it at iteration boundaries. `on_panic` runs only if the worker
    /// panics, and is responsible for the failed-terminal bookkeeping.
    pub fn submit(
        self: &Arc<Self>,
        task_id: &str,
        app_id: Uuid,
        worker: impl FnOnce(CancellationToken) -> BoxFuture<'static, ()>,
        on_panic: BoxFuture<'static, ()>,
    ) {
        let cancel = CancellationToken::new();
        let started_at = Utc::now();

        {
            let mut active = self.active.lock().expect("task manager lock poisoned");
            active.insert(
                task_id.to_string(),
                Entry {
                    app_id,
                    cancel: cancel.clone(),
                    started_at,
                },
            );
        }
        self.spawned_total.fetch_add(1, Ordering::Relaxed);

        let manager = Arc::clone(self);
        let task_id = task_id.to_string();
        let fut = worker(cancel);

        tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
                manager.panicked_total.fetch_add(1, Ordering::Relaxed);
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(task_id = %task_id, panic = %detail, "worker panicked");
                on_panic.await;
            }
            manager.finish(&task_id);
        });
    }

    fn finish(&self, task_id: &str) {
        let entry = {
            let mut active = self.active.lock().expect("task manager lock poisoned");
            active.remove(task_id)
        };
        if let Some(entry) = entry {
            let mut recent = self.recent.lock().expect("task manager lock poisoned");
            if recent.len() >= RECENT_CAP {
                recent.pop_front();
            }
            recent.push_back(FinishedTask {
                task_id: task_id.to_string(),
                app_id: entry.app_id,
                started_at: entry.started_at,
                finished_at: Utc::now(),
            });
        }
    }

    /// Signal cooperative cancellation. Returns whether a worker was
    /// running for the task.
    pub fn cancel(&self, task_id: &str) -> bool {
        let active = self.active.lock().expect("task manager lock poisoned");
        match active.get(task_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn get_active(&self) -> Vec<ActiveTask> {
        let active = self.active.lock().expect("task manager lock poisoned");
        let mut tasks: Vec<ActiveTask> = active
            .iter()
            .map(|(task_id, entry)| ActiveTask {
                task_id: task_id.clone(),
                app_id: entry.app_id,
                started_at: entry.started_at,
            })
            .collect();
        tasks.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        tasks
    }

    pub fn get_recent(&self, limit: usize) -> Vec<FinishedTask> {
        let recent = self.recent.lock().expect("task manager lock poisoned");
        recent.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            active: self
                .active
                .lock()
                .expect("task manager lock poisoned")
                .len(),
            spawned_total: self.spawned_total.load(Ordering::Relaxed),
            panicked_total: self.panicked_total.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.active
            .lock()
            .expect("task manager lock poisoned")
            .contains_key(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[tokio::test]
    async fn worker_runs_and_is_tracked() {
        let manager = Arc::new(TaskManager::new());
        let app_id = Uuid::new_v4();
        let done = Arc::new(AtomicBool::new(false));
        let done_clone = Arc::clone(&done);

        manager.submit(
            "t1",
            app_id,
            move |_cancel| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    done_clone.store(true, Ordering::SeqCst);
                })
            },
            Box::pin(async {}),
        );

        assert!(manager.is_running("t1"));
        assert_eq!(manager.get_active().len(), 1);

        // Wait for the worker to drain.
        for _ in 0..100 {
            if !manager.is_running("t1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(manager.get_recent(10).len(), 1);
        assert_eq!(manager.stats().spawned_total, 1);
    }

    #[tokio::test]
    async fn cancel_reaches_the_worker_token() {
        let manager = Arc::new(TaskManager::new());
        let observed = Arc::new(AtomicBool::new(false));
        let observed_clone = Arc::clone(&observed);

        manager.submit(
            "t1",
            Uuid::new_v4(),
            move |cancel| {
                Box::pin(async move {
                    cancel.cancelled().await;
                    observed_clone.store(true, Ordering::SeqCst);
                })
            },
            Box::pin(async {}),
        );

        assert!(manager.cancel("t1"));
        for _ in 0..100 {
            if observed.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_of_unknown_task_is_false() {
        let manager = Arc::new(TaskManager::new());
        assert!(!manager.cancel("missing"));
    }

    #[tokio::test]
    async fn panicking_worker_triggers_recovery_and_manager_survives() {
        let manager = Arc::new(TaskManager::new());
        let recovered = Arc::new(AtomicBool::new(false));
        let recovered_clone = Arc::clone(&recovered);

        manager.submit(
            "doomed",
            Uuid::new_v4(),
            |_cancel| {
                Box::pin(async {
                    panic!("worker exploded");
                })
            },
            Box::pin(async move {
                recovered_clone.store(true, Ordering::SeqCst);
            }),
        );

        for _ in 0..100 {
            if recovered.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(recovered.load(Ordering::SeqCst));
        assert_eq!(manager.stats().panicked_total, 1);
        assert!(!manager.is_running("doomed"));

        // The manager keeps accepting work afterwards.
        manager.submit(
            "next",
            Uuid::new_v4(),
            |_cancel| Box::pin(async {}),
            Box::pin(async {}),
        );
        assert_eq!(manager.stats().spawned_total, 2);
    }
}
