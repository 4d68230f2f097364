//! Store contracts for profiles, prompt history and the payment ledger
//!
//! The quota core only talks to these traits, so the Postgres store and the
//! in-memory store are interchangeable (and tests can wrap either one).

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::{StoreError, StoreResult};
use crate::types::{
    CounterDrift, GrantOutcome, NewPaymentRecord, NewPromptHistoryEntry, OverdrawnProfile,
    PaymentRecord, PremiumGrant, Profile, ProfileUpdate, PromptHistoryEntry, RecordOutcome,
    UnappliedPayment, UserId,
};

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Point lookup; `None` when the user has no profile row yet
    async fn get_profile(&self, user_id: UserId) -> StoreResult<Option<Profile>>;

    /// Return the profile, creating a free-tier row first if it is missing
    async fn ensure_profile(&self, user_id: UserId, email: Option<&str>) -> StoreResult<Profile>;

    /// Partial update with last-write-wins semantics
    async fn update_profile(&self, user_id: UserId, update: &ProfileUpdate) -> StoreResult<Profile>;

    /// Add `by` to `prompt_count` and return the new value.
    ///
    /// The default reads then writes and can lose an increment under
    /// concurrent callers; stores with an atomic update override it.
    async fn increment_prompt_count(&self, user_id: UserId, by: i32) -> StoreResult<i32> {
        let profile = self
            .get_profile(user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", user_id)))?;
        let update = ProfileUpdate {
            prompt_count: Some(profile.prompt_count + by),
            ..Default::default()
        };
        let updated = self.update_profile(user_id, &update).await?;
        Ok(updated.prompt_count)
    }

    /// Conditional premium grant (see [`PremiumGrant`])
    async fn apply_premium_grant(&self, grant: &PremiumGrant) -> StoreResult<GrantOutcome>;

    /// Zero the counter and start a new allowance window at `period_start`
    async fn reset_allowance(&self, user_id: UserId, period_start: OffsetDateTime) -> StoreResult<Profile>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> StoreResult<()>;
}

#[async_trait]
pub trait PromptHistoryStore: Send + Sync {
    async fn insert_entry(&self, entry: &NewPromptHistoryEntry) -> StoreResult<PromptHistoryEntry>;

    /// Number of rows for the user, optionally only those created at or after `since`
    async fn count_entries(&self, user_id: UserId, since: Option<OffsetDateTime>) -> StoreResult<i64>;

    /// Newest first
    async fn list_entries(&self, user_id: UserId, limit: i64) -> StoreResult<Vec<PromptHistoryEntry>>;
}

#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn has_payment(&self, payment_intent_id: &str) -> StoreResult<bool>;

    /// Insert-only. A second row for the same payment intent is reported as
    /// [`RecordOutcome::Duplicate`], never as an error.
    async fn record_payment(&self, record: &NewPaymentRecord) -> StoreResult<RecordOutcome>;

    async fn list_payments(&self, user_id: UserId) -> StoreResult<Vec<PaymentRecord>>;
}

/// Read-only consistency queries used by the invariant sweep
#[async_trait]
pub trait LedgerAudit: Send + Sync {
    async fn payments_without_premium(&self) -> StoreResult<Vec<UnappliedPayment>>;

    async fn overdrawn_profiles(&self) -> StoreResult<Vec<OverdrawnProfile>>;

    /// Profiles with more history rows in their allowance window than their counter shows
    async fn trailing_counters(&self) -> StoreResult<Vec<CounterDrift>>;
}

/// Shared handles to one backing store, split by contract
#[derive(Clone)]
pub struct Stores {
    pub profiles: Arc<dyn ProfileStore>,
    pub history: Arc<dyn PromptHistoryStore>,
    pub payments: Arc<dyn PaymentLedger>,
    pub audit: Arc<dyn LedgerAudit>,
}

impl Stores {
    /// Use a single backend for every contract
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: ProfileStore + PromptHistoryStore + PaymentLedger + LedgerAudit + 'static,
    {
        Self {
            profiles: backend.clone(),
            history: backend.clone(),
            payments: backend.clone(),
            audit: backend,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
