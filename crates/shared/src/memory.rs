//! In-memory store for tests and local development (`STORE_BACKEND=memory`)
//!
//! Mirrors the Postgres store's semantics: atomic counter increments, the
//! conditional premium grant and the unique payment intent constraint.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{LedgerAudit, PaymentLedger, ProfileStore, PromptHistoryStore};
use crate::types::{
    CounterDrift, GrantOutcome, NewPaymentRecord, NewPromptHistoryEntry, OverdrawnProfile,
    PaymentRecord, PremiumGrant, Profile, ProfileUpdate, PromptHistoryEntry, RecordOutcome,
    UnappliedPayment, UserId,
};

#[derive(Default)]
struct State {
    profiles: HashMap<Uuid, Profile>,
    history: Vec<PromptHistoryEntry>,
    payments: Vec<PaymentRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile row as-is
    pub async fn put_profile(&self, profile: Profile) {
        self.state.write().await.profiles.insert(profile.id, profile);
    }

    /// Insert a history row with an explicit timestamp
    pub async fn put_history(&self, entry: PromptHistoryEntry) {
        self.state.write().await.history.push(entry);
    }

    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    fn missing(user_id: UserId) -> StoreError {
        StoreError::NotFound(format!("profile {}", user_id))
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get_profile(&self, user_id: UserId) -> StoreResult<Option<Profile>> {
        Ok(self.state.read().await.profiles.get(&user_id.0).cloned())
    }

    async fn ensure_profile(&self, user_id: UserId, email: Option<&str>) -> StoreResult<Profile> {
        let mut state = self.state.write().await;
        let profile = state.profiles.entry(user_id.0).or_insert_with(|| {
            Profile::new_free(user_id, email.map(str::to_string), OffsetDateTime::now_utc())
        });
        Ok(profile.clone())
    }

    async fn update_profile(&self, user_id: UserId, update: &ProfileUpdate) -> StoreResult<Profile> {
        let mut state = self.state.write().await;
        let profile = state
            .profiles
            .get_mut(&user_id.0)
            .ok_or_else(|| Self::missing(user_id))?;
        update.apply_to(profile);
        profile.updated_at = OffsetDateTime::now_utc();
        Ok(profile.clone())
    }

    async fn increment_prompt_count(&self, user_id: UserId, by: i32) -> StoreResult<i32> {
        let mut state = self.state.write().await;
        let profile = state
            .profiles
            .get_mut(&user_id.0)
            .ok_or_else(|| Self::missing(user_id))?;
        profile.prompt_count += by;
        profile.updated_at = OffsetDateTime::now_utc();
        Ok(profile.prompt_count)
    }

    async fn apply_premium_grant(&self, grant: &PremiumGrant) -> StoreResult<GrantOutcome> {
        let mut state = self.state.write().await;
        let profile = state
            .profiles
            .get_mut(&grant.user_id.0)
            .ok_or_else(|| Self::missing(grant.user_id))?;

        if profile.last_payment_intent_id.as_deref() == Some(grant.payment_intent_id.as_str()) {
            return Ok(GrantOutcome::AlreadyApplied(profile.clone()));
        }
        if profile.total_prompts_limit != grant.expected_limit
            || profile.is_premium != grant.expected_premium
        {
            return Ok(GrantOutcome::Conflict);
        }

        profile.total_prompts_limit = grant.new_limit;
        profile.is_premium = true;
        profile.has_prompt_history_access = true;
        let now = OffsetDateTime::now_utc();
        if grant.reset_prompt_count {
            profile.prompt_count = 0;
            profile.allowance_period_start = now;
        }
        profile.last_payment_intent_id = Some(grant.payment_intent_id.clone());
        profile.updated_at = now;
        Ok(GrantOutcome::Applied(profile.clone()))
    }

    async fn reset_allowance(&self, user_id: UserId, period_start: OffsetDateTime) -> StoreResult<Profile> {
        let mut state = self.state.write().await;
        let profile = state
            .profiles
            .get_mut(&user_id.0)
            .ok_or_else(|| Self::missing(user_id))?;
        profile.prompt_count = 0;
        profile.allowance_period_start = period_start;
        profile.updated_at = OffsetDateTime::now_utc();
        Ok(profile.clone())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl PromptHistoryStore for MemoryStore {
    async fn insert_entry(&self, entry: &NewPromptHistoryEntry) -> StoreResult<PromptHistoryEntry> {
        let mut state = self.state.write().await;
        if !state.profiles.contains_key(&entry.user_id.0) {
            return Err(Self::missing(entry.user_id));
        }
        let row = PromptHistoryEntry {
            id: Uuid::new_v4(),
            user_id: entry.user_id.0,
            message: entry.message.clone(),
            ai_response: entry.ai_response.clone(),
            tool_type: entry.tool_type,
            created_at: OffsetDateTime::now_utc(),
        };
        state.history.push(row.clone());
        Ok(row)
    }

    async fn count_entries(&self, user_id: UserId, since: Option<OffsetDateTime>) -> StoreResult<i64> {
        let state = self.state.read().await;
        let count = state
            .history
            .iter()
            .filter(|e| e.user_id == user_id.0)
            .filter(|e| since.map_or(true, |s| e.created_at >= s))
            .count();
        Ok(count as i64)
    }

    async fn list_entries(&self, user_id: UserId, limit: i64) -> StoreResult<Vec<PromptHistoryEntry>> {
        let state = self.state.read().await;
        let mut rows: Vec<PromptHistoryEntry> = state
            .history
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id.0)
            .cloned()
            .collect();
        // Stable sort over reversed insertion keeps same-instant rows newest first
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(usize::try_from(limit.max(0)).unwrap_or(0));
        Ok(rows)
    }
}

#[async_trait]
impl PaymentLedger for MemoryStore {
    async fn has_payment(&self, payment_intent_id: &str) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .any(|p| p.payment_intent_id == payment_intent_id))
    }

    async fn record_payment(&self, record: &NewPaymentRecord) -> StoreResult<RecordOutcome> {
        let mut state = self.state.write().await;
        if state
            .payments
            .iter()
            .any(|p| p.payment_intent_id == record.payment_intent_id)
        {
            return Ok(RecordOutcome::Duplicate);
        }
        let row = PaymentRecord {
            id: Uuid::new_v4(),
            user_id: record.user_id.0,
            amount_cents: record.amount_cents,
            currency: record.currency.clone(),
            status: record.status,
            payment_intent_id: record.payment_intent_id.clone(),
            created_at: OffsetDateTime::now_utc(),
        };
        state.payments.push(row.clone());
        Ok(RecordOutcome::Inserted(row))
    }

    async fn list_payments(&self, user_id: UserId) -> StoreResult<Vec<PaymentRecord>> {
        let state = self.state.read().await;
        let mut rows: Vec<PaymentRecord> = state
            .payments
            .iter()
            .rev()
            .filter(|p| p.user_id == user_id.0)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

#[async_trait]
impl LedgerAudit for MemoryStore {
    async fn payments_without_premium(&self) -> StoreResult<Vec<UnappliedPayment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| {
                state
                    .profiles
                    .get(&p.user_id)
                    .is_some_and(|profile| !profile.is_premium)
            })
            .map(|p| UnappliedPayment {
                user_id: p.user_id,
                payment_intent_id: p.payment_intent_id.clone(),
                created_at: p.created_at,
            })
            .collect())
    }

    async fn overdrawn_profiles(&self) -> StoreResult<Vec<OverdrawnProfile>> {
        let state = self.state.read().await;
        Ok(state
            .profiles
            .values()
            .filter(|p| p.prompt_count > p.total_prompts_limit)
            .map(|p| OverdrawnProfile {
                user_id: p.id,
                prompt_count: p.prompt_count,
                total_prompts_limit: p.total_prompts_limit,
                is_premium: p.is_premium,
            })
            .collect())
    }

    async fn trailing_counters(&self) -> StoreResult<Vec<CounterDrift>> {
        let state = self.state.read().await;
        Ok(state
            .profiles
            .values()
            .filter_map(|p| {
                let history_count = state
                    .history
                    .iter()
                    .filter(|e| e.user_id == p.id && e.created_at >= p.allowance_period_start)
                    .count() as i64;
                (history_count > i64::from(p.prompt_count)).then(|| CounterDrift {
                    user_id: p.id,
                    prompt_count: p.prompt_count,
                    history_count,
                })
            })
            .collect())
    }
}
