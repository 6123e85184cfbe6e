//! Per-(app, user) trust metrics and level-upgrade suggestions.
//!
//! Every terminal task updates the metrics; success means the outcome
//! was `complete` or `saturated`. Updates for one (app, user) pair are
//! serialized through a striped lock so concurrent workers cannot lose
//! increments. The trust level itself never changes here -- only the
//! user-initiated `PUT /trust/level` mutates it.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use symphony_db::models::{Outcome, TrustMetrics, UserProfile};
use symphony_db::store::Store;

use crate::error::LoopError;

/// Thresholds for suggesting a level upgrade.
const LEVEL_1_STREAK: i64 = 5;
const LEVEL_1_RATE: f64 = 0.80;
const LEVEL_2_STREAK: i64 = 10;
const LEVEL_2_RATE: f64 = 0.90;

/// A suggested (never applied) trust-level upgrade.
#[derive(Debug, Clone, Serialize)]
pub struct TrustSuggestion {
    pub from_level: i16,
    pub to_level: i16,
    pub reason: String,
}

pub struct TrustTracker {
    store: Arc<dyn Store>,
    /// One async mutex per (app, user) pair seen so far.
    locks: Mutex<HashMap<(Uuid, String), Arc<Mutex<()>>>>,
}

impl TrustTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, app_id: Uuid, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry((app_id, user_id.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Apply one terminal outcome. `outcome` is `None` for tasks that
    /// failed or were cancelled before producing one; those count as
    /// failures.
    pub async fn record_outcome(
        &self,
        app_id: Uuid,
        user_id: &str,
        outcome: Option<Outcome>,
    ) -> Result<UserProfile> {
        let success = outcome.is_some_and(Outcome::is_success);
        let lock = self.lock_for(app_id, user_id).await;
        let _guard = lock.lock().await;
        self.store.ensure_user_profile(app_id, user_id).await?;
        self.store
            .record_trust_outcome(app_id, user_id, success)
            .await
    }

    pub async fn metrics(&self, app_id: Uuid, user_id: &str) -> Result<TrustMetrics> {
        let profile = self.store.ensure_user_profile(app_id, user_id).await?;
        Ok(TrustMetrics::from(&profile))
    }

    /// The upgrade the metrics currently justify, if any.
    ///
    /// 0 -> 1 after 5 consecutive successes at >= 80% overall;
    /// 1 -> 2 after 10 consecutive successes at >= 90% overall.
    /// Downgrades are never suggested.
    pub fn suggestion_for(profile: &UserProfile) -> Option<TrustSuggestion> {
        let rate = profile.success_rate();
        match profile.current_trust_level {
            0 if profile.consecutive_successes >= LEVEL_1_STREAK && rate >= LEVEL_1_RATE => {
                Some(TrustSuggestion {
                    from_level: 0,
                    to_level: 1,
                    reason: format!(
                        "{} consecutive successes at {:.0}% success rate",
                        profile.consecutive_successes,
                        rate * 100.0
                    ),
                })
            }
            1 if profile.consecutive_successes >= LEVEL_2_STREAK && rate >= LEVEL_2_RATE => {
                Some(TrustSuggestion {
                    from_level: 1,
                    to_level: 2,
                    reason: format!(
                        "{} consecutive successes at {:.0}% success rate",
                        profile.consecutive_successes,
                        rate * 100.0
                    ),
                })
            }
            _ => None,
        }
    }

    pub async fn suggestion(&self, app_id: Uuid, user_id: &str) -> Result<Option<TrustSuggestion>> {
        let profile = self.store.ensure_user_profile(app_id, user_id).await?;
        Ok(Self::suggestion_for(&profile))
    }

    /// The only mutation path for the trust level.
    pub async fn set_level(
        &self,
        app_id: Uuid,
        user_id: &str,
        level: i16,
    ) -> Result<UserProfile, LoopError> {
        if !(0..=2).contains(&level) {
            return Err(LoopError::Validation(format!(
                "trust_level must be 0, 1 or 2, got {level}"
            )));
        }
        self.store
            .ensure_user_profile(app_id, user_id)
            .await
            .map_err(LoopError::Internal)?;
        self.store
            .set_trust_level(app_id, user_id, level)
            .await
            .map_err(LoopError::Internal)
    }
}
