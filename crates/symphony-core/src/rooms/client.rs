//! HTTP delegation to a sibling room.
//!
//! Delegation posts the sub-request to the room's `/task` endpoint and
//! polls `/task/{id}` until a terminal status, then normalizes the
//! response into an [`InstrumentResult`]. Timeouts, 5xx replies and
//! unreachable rooms surface as [`LoopError::Delegation`], which the
//! conductor converts into a failover event rather than a task failure.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, warn};

use symphony_db::models::{Outcome, ProcessType};

use super::Room;
use crate::error::LoopError;
use crate::types::{ExecutionMetadata, Finding, InstrumentResult, TaskRequest};

#[derive(Debug, Clone)]
pub struct RoomClientConfig {
    /// Wall-clock budget for one delegated sub-task.
    pub delegation_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RoomClientConfig {
    fn default() -> Self {
        Self {
            delegation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(500),
        }
    }
}

pub struct RoomClient {
    http: Client,
    config: RoomClientConfig,
}

impl RoomClient {
    pub fn new(config: RoomClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, config })
    }

    /// Run a sub-task on a remote room to a terminal outcome.
    pub async fn delegate(
        &self,
        room: &Room,
        request: &TaskRequest,
    ) -> Result<InstrumentResult, LoopError> {
        let submit_url = format!("{}/task", room.url.trim_end_matches('/'));
        let submitted: Value = self
            .http
            .post(&submit_url)
            .json(request)
            .send()
            .await
            .map_err(|e| LoopError::Delegation(format!("room {} unreachable: {e}", room.room_id)))?
            .error_for_status()
            .map_err(|e| LoopError::Delegation(format!("room {} rejected task: {e}", room.room_id)))?
            .json()
            .await
            .map_err(|e| {
                LoopError::Delegation(format!("room {} sent malformed reply: {e}", room.room_id))
            })?;

        let task_id = submitted["task_id"]
            .as_str()
            .or_else(|| submitted["id"].as_str())
            .ok_or_else(|| {
                LoopError::Delegation(format!("room {} reply carried no task id", room.room_id))
            })?
            .to_string();

        debug!(room_id = %room.room_id, task_id = %task_id, "sub-task delegated, polling");

        let deadline = Instant::now() + self.config.delegation_timeout;
        let poll_url = format!("{}/task/{task_id}", room.url.trim_end_matches('/'));

        loop {
            if Instant::now() >= deadline {
                // Best-effort cancel so the room stops burning iterations.
                self.cancel(room, &task_id).await;
                return Err(LoopError::Delegation(format!(
                    "room {} timed out after {:?}",
                    room.room_id, self.config.delegation_timeout
                )));
            }

            let polled: Value = self
                .http
                .get(&poll_url)
                .send()
                .await
                .map_err(|e| {
                    LoopError::Delegation(format!("room {} poll failed: {e}", room.room_id))
                })?
                .error_for_status()
                .map_err(|e| {
                    LoopError::Delegation(format!("room {} poll rejected: {e}", room.room_id))
                })?
                .json()
                .await
                .map_err(|e| {
                    LoopError::Delegation(format!(
                        "room {} sent malformed poll reply: {e}",
                        room.room_id
                    ))
                })?;

            match polled["status"].as_str() {
                Some("complete") => {
                    return Ok(Self::normalize(room, &task_id, &polled));
                }
                Some("failed") | Some("cancelled") => {
                    return Err(LoopError::Delegation(format!(
                        "room {} task {} ended {}: {}",
                        room.room_id,
                        task_id,
                        polled["status"].as_str().unwrap_or("unknown"),
                        polled["error"].as_str().unwrap_or("no detail"),
                    )));
                }
                _ => {}
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Best-effort cancel propagation to a delegated sub-task.
    pub async fn cancel(&self, room: &Room, task_id: &str) {
        let url = format!("{}/task/{task_id}/cancel", room.url.trim_end_matches('/'));
        if let Err(e) = self.http.post(&url).send().await {
            warn!(room_id = %room.room_id, task_id, error = %e, "cancel propagation failed");
        }
    }

    /// Map a remote terminal response onto an [`InstrumentResult`].
    fn normalize(room: &Room, task_id: &str, polled: &Value) -> InstrumentResult {
        let response = polled.get("response").cloned().unwrap_or_else(|| json!({}));

        // A well-behaved room returns our own response shape; accept it
        // directly and fall back field by field otherwise.
        if let Ok(mut result) =
            serde_json::from_value::<InstrumentResult>(response.clone())
        {
            result.metadata.room_id = Some(room.room_id.clone());
            return result;
        }

        let summary = response["summary"]
            .as_str()
            .unwrap_or("remote room returned no summary")
            .to_string();
        let confidence = response["confidence"].as_f64().unwrap_or(0.5);
        let outcome = response["outcome"]
            .as_str()
            .and_then(|s| s.parse::<Outcome>().ok())
            .unwrap_or(Outcome::Complete);

        let mut metadata = ExecutionMetadata::new("remote", ProcessType::Conscious);
        metadata.room_id = Some(room.room_id.clone());
        metadata.iterations = response["metadata"]["iterations"].as_u64().unwrap_or(1) as u32;

        InstrumentResult {
            findings: vec![
                Finding::new(summary.clone(), confidence)
                    .with_source(format!("room:{}/task/{task_id}", room.room_id)),
            ],
            summary,
            confidence,
            outcome,
            discrepancy: None,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::{RoomStatus, RoomType};
    use chrono::Utc;

    fn room() -> Room {
        Room {
            room_id: "r1".to_string(),
            room_name: "remote".to_string(),
            room_type: RoomType::Server,
            url: "http://room.example.com".to_string(),
            capabilities: vec!["reasoning".to_string()],
            status: RoomStatus::Online,
            load: 0.0,
            last_seen_at: Utc::now(),
            is_local: false,
        }
    }

    #[test]
    fn normalize_accepts_native_result_shape() {
        let polled = json!({
            "status": "complete",
            "response": {
                "findings": [],
                "summary": "remote answer",
                "confidence": 0.8,
                "outcome": "complete",
                "discrepancy": null,
                "metadata": {
                    "instrument_used": "research",
                    "iterations": 2,
                    "duration_ms": 100,
                    "sources_consulted": ["https://example.com"],
                    "process_type": "semi_autonomic",
                    "room_id": null,
                    "failover_events": []
                }
            }
        });
        let result = RoomClient::normalize(&room(), "t9", &polled);
        assert_eq!(result.summary, "remote answer");
        assert_eq!(result.metadata.iterations, 2);
        assert_eq!(result.metadata.room_id.as_deref(), Some("r1"));
    }

    #[test]
    fn normalize_degrades_foreign_shapes() {
        let polled = json!({
            "status": "complete",
            "response": {"summary": "loose answer", "confidence": 0.7, "outcome": "saturated"}
        });
        let result = RoomClient::normalize(&room(), "t9", &polled);
        assert_eq!(result.summary, "loose answer");
        assert_eq!(result.outcome, Outcome::Saturated);
        assert_eq!(result.findings.len(), 1);
        assert!(result.findings[0].source.as_deref().unwrap().contains("room:r1"));
    }
}
