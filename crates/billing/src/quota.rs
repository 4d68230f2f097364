//! Quota reconciliation
//!
//! `prompt_count` and the prompt history table are updated by separate writes,
//! so either can fall behind after a partial failure. Usage is reported as the
//! larger of the two, which never under-reports a prompt that was delivered.

use std::sync::Arc;

use metamind_shared::{Profile, ProfileStore, PromptHistoryStore, UserId};
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::locks::UserLocks;
use crate::policy::QuotaPolicy;

/// Reconciled quota view for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledQuota {
    pub user_id: UserId,
    /// max(stored counter, history rows in the allowance window)
    pub used: i64,
    pub limit: i32,
    pub remaining: i64,
    pub is_premium: bool,
    pub has_prompt_history_access: bool,
    pub stored_count: i32,
    pub history_count: i64,
    #[serde(skip)]
    pub profile: Option<Profile>,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
}

impl ReconciledQuota {
    pub fn is_exhausted(&self) -> bool {
        self.used >= i64::from(self.limit)
    }
}

pub struct QuotaReconciler {
    profiles: Arc<dyn ProfileStore>,
    history: Arc<dyn PromptHistoryStore>,
    policy: QuotaPolicy,
    locks: UserLocks,
}

impl QuotaReconciler {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        history: Arc<dyn PromptHistoryStore>,
        policy: QuotaPolicy,
        locks: UserLocks,
    ) -> Self {
        Self {
            profiles,
            history,
            policy,
            locks,
        }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Prompts used so far, as the UI should trust it
    pub async fn reconcile_count(&self, user_id: UserId) -> BillingResult<i64> {
        Ok(self.reconcile(user_id).await?.used)
    }

    /// Full reconciled view: counters, limit and premium flags
    pub async fn reconcile(&self, user_id: UserId) -> BillingResult<ReconciledQuota> {
        let now = OffsetDateTime::now_utc();
        let mut profile = self.profiles.get_profile(user_id).await?;

        if let Some(current) = &profile {
            if self.policy.allowance_expired(current, now) {
                let _guard = self.locks.lock(user_id).await;
                // Another writer may have reset it while we waited
                let fresh = self.profiles.get_profile(user_id).await?;
                profile = match fresh {
                    Some(p) if self.policy.allowance_expired(&p, now) => {
                        tracing::info!(
                            user_id = %user_id,
                            previous_count = p.prompt_count,
                            period_start = %p.allowance_period_start,
                            "Free allowance window expired, resetting prompt count"
                        );
                        Some(self.profiles.reset_allowance(user_id, now).await?)
                    }
                    other => other,
                };
            }
        }

        let since = self.policy.history_window_start(profile.as_ref());
        let history_count = self.history.count_entries(user_id, since).await?;
        let stored_count = profile.as_ref().map_or(0, |p| p.prompt_count);
        let used = i64::from(stored_count).max(history_count);

        if history_count != i64::from(stored_count) {
            tracing::debug!(
                user_id = %user_id,
                stored_count,
                history_count,
                "Prompt counter and history disagree, using the larger value"
            );
        }

        let state = self.policy.effective_state(profile.as_ref(), used);
        Ok(ReconciledQuota {
            user_id,
            used,
            limit: state.limit,
            remaining: (i64::from(state.limit) - used).max(0),
            is_premium: state.is_premium,
            has_prompt_history_access: state.has_prompt_history_access,
            stored_count,
            history_count,
            profile,
            fetched_at: now,
        })
    }

    /// Fail with `QuotaExceeded` when no prompts are left
    pub async fn check_quota(&self, user_id: UserId) -> BillingResult<ReconciledQuota> {
        let quota = self.reconcile(user_id).await?;
        ensure_quota_available(&quota)?;
        Ok(quota)
    }

    /// Count one delivered prompt; returns the stored counter after the increment
    pub async fn increment_after_generation(&self, user_id: UserId) -> BillingResult<i32> {
        let _guard = self.locks.lock(user_id).await;
        let count = self.profiles.increment_prompt_count(user_id, 1).await?;
        tracing::debug!(user_id = %user_id, prompt_count = count, "Prompt counter incremented");
        Ok(count)
    }
}

/// Quota gate on an already reconciled view
pub fn ensure_quota_available(quota: &ReconciledQuota) -> BillingResult<()> {
    if quota.is_exhausted() {
        tracing::info!(
            user_id = %quota.user_id,
            used = quota.used,
            limit = quota.limit,
            "Prompt quota exhausted"
        );
        return Err(BillingError::QuotaExceeded {
            used: quota.used,
            limit: quota.limit,
        });
    }
    Ok(())
}
