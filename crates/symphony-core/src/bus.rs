//! Per-task in-memory event bus.
//!
//! Every task owns a topic: a bounded history plus a broadcast channel.
//! Late subscribers replay the full history before receiving live
//! events; the snapshot and the live subscription happen under the same
//! lock, so the delivered prefix is exactly the history at subscribe
//! time with no gap and no duplicate.
//!
//! A terminal event (`complete`, `error`, `cancelled`) is emitted at
//! most once per topic and is the last event on it: the topic is marked
//! terminal and further emits are dropped. History overflow drops the
//! oldest events, which are never the terminal one (it is always last).

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use symphony_db::models::Outcome;

/// Events observable on a task's topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Started {
        task_id: String,
        ts: DateTime<Utc>,
    },
    Iteration {
        task_id: String,
        iteration_num: u32,
        phase: String,
        duration_ms: u64,
        data: Value,
        ts: DateTime<Utc>,
    },
    Complete {
        task_id: String,
        outcome: Outcome,
        summary: String,
        confidence: f64,
        ts: DateTime<Utc>,
    },
    Error {
        task_id: String,
        error: String,
        ts: DateTime<Utc>,
    },
    Cancelled {
        task_id: String,
        ts: DateTime<Utc>,
    },
}

impl TaskEvent {
    pub fn started(task_id: impl Into<String>) -> Self {
        Self::Started {
            task_id: task_id.into(),
            ts: Utc::now(),
        }
    }

    pub fn iteration(
        task_id: impl Into<String>,
        iteration_num: u32,
        phase: impl Into<String>,
        duration_ms: u64,
        data: Value,
    ) -> Self {
        Self::Iteration {
            task_id: task_id.into(),
            iteration_num,
            phase: phase.into(),
            duration_ms,
            data,
            ts: Utc::now(),
        }
    }

    pub fn complete(
        task_id: impl Into<String>,
        outcome: Outcome,
        summary: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self::Complete {
            task_id: task_id.into(),
            outcome,
            summary: summary.into(),
            confidence,
            ts: Utc::now(),
        }
    }

    pub fn error(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Error {
            task_id: task_id.into(),
            error: error.into(),
            ts: Utc::now(),
        }
    }

    pub fn cancelled(task_id: impl Into<String>) -> Self {
        Self::Cancelled {
            task_id: task_id.into(),
            ts: Utc::now(),
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::Started { task_id, .. }
            | Self::Iteration { task_id, .. }
            | Self::Complete { task_id, .. }
            | Self::Error { task_id, .. }
            | Self::Cancelled { task_id, .. } => task_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Error { .. } | Self::Cancelled { .. }
        )
    }
}

/// Bus tuning knobs.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Per-topic history bound; overflow drops oldest non-terminal.
    pub history_cap: usize,
    /// How long a terminal topic is retained for late joiners.
    pub terminal_ttl: Duration,
    /// Live subscriber buffer; a lagging subscriber loses oldest events
    /// but never the terminal one (the stream re-syncs on lag).
    pub subscriber_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_cap: 1024,
            terminal_ttl: Duration::from_secs(15 * 60),
            subscriber_buffer: 256,
        }
    }
}

struct Topic {
    history: VecDeque<TaskEvent>,
    terminal: bool,
    terminal_at: Option<Instant>,
    tx: broadcast::Sender<TaskEvent>,
}

impl Topic {
    fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            history: VecDeque::new(),
            terminal: false,
            terminal_at: None,
            tx,
        }
    }
}

/// The per-task pub/sub plane.
pub struct EventBus {
    topics: Mutex<HashMap<String, Topic>>,
    config: BusConfig,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Append to history and fan out. Emits on a terminal topic are
    /// dropped.
    pub fn emit(&self, event: TaskEvent) {
        let mut topics = self.topics.lock().expect("event bus lock poisoned");
        let topic = topics
            .entry(event.task_id().to_string())
            .or_insert_with(|| Topic::new(self.config.subscriber_buffer));

        if topic.terminal {
            debug!(task_id = event.task_id(), "dropping emit on terminal topic");
            return;
        }

        if topic.history.len() >= self.config.history_cap {
            topic.history.pop_front();
        }
        topic.history.push_back(event.clone());

        if event.is_terminal() {
            topic.terminal = true;
            topic.terminal_at = Some(Instant::now());
        }

        // No receivers is fine; history covers late joiners.
        let _ = topic.tx.send(event);
    }

    /// Subscribe to a task's topic. The stream yields the history
    /// snapshot first, then live events, and ends after the terminal
    /// event.
    pub fn subscribe(&self, task_id: &str) -> Pin<Box<dyn Stream<Item = TaskEvent> + Send>> {
        let (snapshot, already_terminal, mut rx) = {
            let mut topics = self.topics.lock().expect("event bus lock poisoned");
            let topic = topics
                .entry(task_id.to_string())
                .or_insert_with(|| Topic::new(self.config.subscriber_buffer));
            (
                topic.history.iter().cloned().collect::<Vec<_>>(),
                topic.terminal,
                topic.tx.subscribe(),
            )
        };

        Box::pin(async_stream::stream! {
            for event in snapshot {
                yield event;
            }
            if already_terminal {
                return;
            }
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "subscriber lagged, dropping oldest events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// History snapshot without subscribing.
    pub fn history(&self, task_id: &str) -> Vec<TaskEvent> {
        let topics = self.topics.lock().expect("event bus lock poisoned");
        topics
            .get(task_id)
            .map(|t| t.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop terminal topics older than the retention TTL. Called from
    /// the background health loop.
    pub fn gc(&self) -> usize {
        let ttl = self.config.terminal_ttl;
        let mut topics = self.topics.lock().expect("event bus lock poisoned");
        let before = topics.len();
        topics.retain(|_, topic| match topic.terminal_at {
            Some(at) => at.elapsed() < ttl,
            None => true,
        });
        before - topics.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.lock().expect("event bus lock poisoned").len()
    }
}
