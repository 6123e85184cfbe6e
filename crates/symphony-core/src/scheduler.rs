//! Cron-driven heartbeat scheduler.
//!
//! A single tick loop (default every 60 s) walks the active heartbeats
//! and, for each whose cron expression matches the current minute in
//! its timezone, materializes a task from the query template and
//! submits it at trust level 1. The unique (heartbeat, minute) run row
//! is the duplicate-fire guard, so two ticks inside the same cron
//! minute produce exactly one run. A watcher subscribed to the task's
//! event topic records the run outcome and fires the webhook.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use symphony_db::models::{Heartbeat, HeartbeatRunStatus};
use symphony_db::store::{NewHeartbeatRun, Store};

use crate::bus::{EventBus, TaskEvent};
use crate::conductor::Conductor;
use crate::types::{RequestContext, TaskRequest};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub webhook_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            webhook_timeout: Duration::from_secs(10),
        }
    }
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    conductor: Arc<Conductor>,
    bus: Arc<EventBus>,
    http: reqwest::Client,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        conductor: Arc<Conductor>,
        bus: Arc<EventBus>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.webhook_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            store,
            conductor,
            bus,
            http,
            config,
        })
    }

    /// Run the tick loop until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval = ?self.config.tick_interval, "scheduler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        warn!(error = %format!("{e:#}"), "scheduler tick failed");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("scheduler stopped");
                    return;
                }
            }
        }
    }

    /// One pass over the active heartbeats. Returns how many fired.
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Result<u32> {
        let heartbeats = self.store.list_active_heartbeats().await?;
        let mut fired = 0;

        for heartbeat in heartbeats {
            if !cron_matches_minute(&heartbeat.cron_expression, &heartbeat.timezone, now) {
                continue;
            }
            match self.fire(&heartbeat, now).await {
                Ok(true) => fired += 1,
                Ok(false) => {
                    debug!(heartbeat_id = %heartbeat.id, "duplicate fire suppressed");
                }
                Err(e) => {
                    warn!(
                        heartbeat_id = %heartbeat.id,
                        error = %format!("{e:#}"),
                        "heartbeat fire failed"
                    );
                }
            }
        }
        Ok(fired)
    }

    /// Materialize and submit one heartbeat. Returns false when the
    /// duplicate-fire guard suppressed it.
    async fn fire(self: &Arc<Self>, heartbeat: &Heartbeat, now: DateTime<Utc>) -> Result<bool> {
        let fire_minute = truncate_to_minute(now);
        let Some(run) = self
            .store
            .insert_heartbeat_run(&NewHeartbeatRun {
                heartbeat_id: heartbeat.id,
                app_id: heartbeat.app_id,
                task_id: None,
                fire_minute,
            })
            .await?
        else {
            return Ok(false);
        };

        let request = materialize_request(heartbeat, now);
        let outcome = self
            .conductor
            .submit(heartbeat.app_id, heartbeat.user_id.clone(), request)
            .await;

        let submitted = match outcome {
            Ok(submitted) => submitted,
            Err(e) => {
                self.store
                    .complete_heartbeat_run(
                        run.id,
                        HeartbeatRunStatus::Failed,
                        None,
                        Some(e.to_string()),
                    )
                    .await?;
                return Err(anyhow::anyhow!("heartbeat submit failed: {e}"));
            }
        };

        info!(
            heartbeat_id = %heartbeat.id,
            task_id = %submitted.task_id,
            "heartbeat fired"
        );
        self.store
            .set_heartbeat_run_task(run.id, &submitted.task_id)
            .await?;

        // Watch the task to its terminal event, record the run outcome,
        // and fire the webhook.
        let scheduler = Arc::clone(self);
        let webhook_url = heartbeat.webhook_url.clone();
        let app_id = heartbeat.app_id;
        let run_id = run.id;
        let task_id = submitted.task_id;
        tokio::spawn(async move {
            scheduler
                .watch_run(app_id, run_id, task_id, webhook_url)
                .await;
        });

        Ok(true)
    }

    async fn watch_run(
        &self,
        app_id: uuid::Uuid,
        run_id: uuid::Uuid,
        task_id: String,
        webhook_url: Option<String>,
    ) {
        let mut stream = self.bus.subscribe(&task_id);
        while let Some(event) = stream.next().await {
            let (status, outcome, error) = match &event {
                TaskEvent::Complete { outcome, .. } => {
                    (HeartbeatRunStatus::Complete, Some(*outcome), None)
                }
                TaskEvent::Error { error, .. } => {
                    (HeartbeatRunStatus::Failed, None, Some(error.clone()))
                }
                TaskEvent::Cancelled { .. } => (
                    HeartbeatRunStatus::Failed,
                    None,
                    Some("cancelled".to_string()),
                ),
                _ => continue,
            };

            if let Err(e) = self
                .store
                .complete_heartbeat_run(run_id, status, outcome, error)
                .await
            {
                warn!(error = %format!("{e:#}"), "failed to record heartbeat run outcome");
            }

            if let Some(url) = &webhook_url {
                self.post_webhook(app_id, &task_id, url).await;
            }
            return;
        }
    }

    /// Fire-and-forget webhook POST of the terminal response.
    async fn post_webhook(&self, app_id: uuid::Uuid, task_id: &str, url: &str) {
        let body = match self.store.get_task(app_id, task_id).await {
            Ok(Some(task)) => task.response.unwrap_or_else(|| {
                serde_json::json!({"task_id": task_id, "status": task.status})
            }),
            _ => serde_json::json!({"task_id": task_id}),
        };
        match self.http.post(url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(task_id, url, "webhook delivered");
            }
            Ok(resp) => {
                warn!(task_id, url, status = %resp.status(), "webhook rejected");
            }
            Err(e) => {
                warn!(task_id, url, error = %e, "webhook failed");
            }
        }
    }
}

/// Validate a cron expression the way the tick loop will parse it.
pub fn validate_cron_expression(expression: &str) -> Result<(), crate::error::LoopError> {
    let fields = expression.split_whitespace().count();
    if !(5..=7).contains(&fields) {
        return Err(crate::error::LoopError::Validation(format!(
            "cron expression must have 5 to 7 fields, got {fields}"
        )));
    }
    let normalized = if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| {
        crate::error::LoopError::Validation(format!("unparsable cron expression: {e}"))
    })?;
    Ok(())
}

/// Validate an IANA timezone name.
pub fn validate_timezone(timezone: &str) -> Result<(), crate::error::LoopError> {
    timezone.parse::<Tz>().map_err(|_| {
        crate::error::LoopError::Validation(format!("unknown timezone {timezone:?}"))
    })?;
    Ok(())
}

/// Whether a cron expression matches the minute containing `now` in the
/// given timezone. Standard 5-field expressions get a seconds field
/// prepended; 6- and 7-field expressions pass through.
pub fn cron_matches_minute(expression: &str, timezone: &str, now: DateTime<Utc>) -> bool {
    let fields = expression.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };

    let Ok(schedule) = Schedule::from_str(&normalized) else {
        warn!(expression, "unparsable cron expression");
        return false;
    };

    let tz: Tz = timezone.parse().unwrap_or_else(|_| {
        warn!(timezone, "unknown timezone, assuming UTC");
        Tz::UTC
    });

    let local_minute = truncate_to_minute(now).with_timezone(&tz);
    schedule.includes(local_minute)
}

fn truncate_to_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

/// Build the task request from a heartbeat's templates. `{date}` and
/// `{user_name}` are substituted in the local timezone.
pub fn materialize_request(heartbeat: &Heartbeat, now: DateTime<Utc>) -> TaskRequest {
    let tz: Tz = heartbeat.timezone.parse().unwrap_or(Tz::UTC);
    let date = now.with_timezone(&tz).format("%Y-%m-%d").to_string();
    let user_name = heartbeat.user_id.clone().unwrap_or_else(|| "there".to_string());

    let query = heartbeat
        .query_template
        .replace("{date}", &date)
        .replace("{user_name}", &user_name);

    let context = heartbeat
        .context_template
        .clone()
        .and_then(|template| serde_json::from_value::<RequestContext>(template).ok())
        .unwrap_or_default();

    let mut request = TaskRequest::from_query(query);
    request.context = context;
    // Heartbeat tasks never wait for approval.
    request.preferences.trust_level = Some(1);
    request.preferences.notify_on_complete = false;
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn heartbeat(template: &str, tz: &str) -> Heartbeat {
        Heartbeat {
            id: uuid::Uuid::new_v4(),
            app_id: uuid::Uuid::new_v4(),
            user_id: Some("ada".to_string()),
            name: "daily".to_string(),
            query_template: template.to_string(),
            cron_expression: "0 9 * * *".to_string(),
            timezone: tz.to_string(),
            context_template: None,
            webhook_url: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn five_field_cron_matches_its_minute() {
        let nine_utc = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 42).unwrap();
        assert!(cron_matches_minute("0 9 * * *", "UTC", nine_utc));

        let nine_oh_one = Utc.with_ymd_and_hms(2026, 3, 2, 9, 1, 0).unwrap();
        assert!(!cron_matches_minute("0 9 * * *", "UTC", nine_oh_one));
    }

    #[test]
    fn timezone_shifts_the_match() {
        // 09:00 in New York is 14:00 UTC on this date (EST+DST -> -5h/-4h;
        // March 2nd is EST, -5).
        let two_pm_utc = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 10).unwrap();
        assert!(cron_matches_minute("0 9 * * *", "America/New_York", two_pm_utc));
        assert!(!cron_matches_minute("0 9 * * *", "UTC", two_pm_utc));
    }

    #[test]
    fn every_minute_expression_always_matches() {
        let any = Utc.with_ymd_and_hms(2026, 7, 4, 23, 59, 59).unwrap();
        assert!(cron_matches_minute("* * * * *", "UTC", any));
    }

    #[test]
    fn unparsable_expression_never_matches() {
        let any = Utc.with_ymd_and_hms(2026, 7, 4, 12, 0, 0).unwrap();
        assert!(!cron_matches_minute("not a cron", "UTC", any));
    }

    #[test]
    fn materialize_substitutes_placeholders() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let hb = heartbeat("Good morning {user_name}, summarize the news for {date}", "UTC");
        let request = materialize_request(&hb, now);
        assert_eq!(
            request.query,
            "Good morning ada, summarize the news for 2026-03-02"
        );
        assert_eq!(request.preferences.trust_level, Some(1));
    }

    #[test]
    fn materialize_uses_local_date() {
        // 23:30 UTC is already the next day in Tokyo.
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 23, 30, 0).unwrap();
        let hb = heartbeat("digest for {date}", "Asia/Tokyo");
        let request = materialize_request(&hb, now);
        assert_eq!(request.query, "digest for 2026-03-03");
    }
}
