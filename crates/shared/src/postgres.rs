//! Postgres-backed store (Supabase compatible)

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult, UNIQUE_VIOLATION};
use crate::store::{LedgerAudit, PaymentLedger, ProfileStore, PromptHistoryStore};
use crate::types::{
    CounterDrift, GrantOutcome, NewPaymentRecord, NewPromptHistoryEntry, OverdrawnProfile,
    PaymentRecord, PremiumGrant, Profile, ProfileUpdate, PromptHistoryEntry, RecordOutcome,
    UnappliedPayment, UserId, FREE_PROMPT_LIMIT,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn get_profile(&self, user_id: UserId) -> StoreResult<Option<Profile>> {
        let profile: Option<Profile> = sqlx::query_as(
            r#"
            SELECT id, name, email, prompt_count, total_prompts_limit, is_premium,
                   has_prompt_history_access, allowance_period_start,
                   last_payment_intent_id, created_at, updated_at
            FROM profiles
            WHERE id = $1
            "#,
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile)
    }

    async fn ensure_profile(&self, user_id: UserId, email: Option<&str>) -> StoreResult<Profile> {
        sqlx::query(
            r#"
            INSERT INTO profiles (id, email, prompt_count, total_prompts_limit)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(user_id.0)
        .bind(email)
        .bind(FREE_PROMPT_LIMIT)
        .execute(&self.pool)
        .await?;

        self.get_profile(user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", user_id)))
    }

    async fn update_profile(&self, user_id: UserId, update: &ProfileUpdate) -> StoreResult<Profile> {
        let profile: Option<Profile> = sqlx::query_as(
            r#"
            UPDATE profiles
            SET name = COALESCE($2, name),
                prompt_count = COALESCE($3, prompt_count),
                total_prompts_limit = COALESCE($4, total_prompts_limit),
                is_premium = COALESCE($5, is_premium),
                has_prompt_history_access = COALESCE($6, has_prompt_history_access),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, email, prompt_count, total_prompts_limit, is_premium,
                      has_prompt_history_access, allowance_period_start,
                      last_payment_intent_id, created_at, updated_at
            "#,
        )
        .bind(user_id.0)
        .bind(update.name.as_deref())
        .bind(update.prompt_count)
        .bind(update.total_prompts_limit)
        .bind(update.is_premium)
        .bind(update.has_prompt_history_access)
        .fetch_optional(&self.pool)
        .await?;

        profile.ok_or_else(|| StoreError::NotFound(format!("profile {}", user_id)))
    }

    async fn increment_prompt_count(&self, user_id: UserId, by: i32) -> StoreResult<i32> {
        // Single statement, so concurrent increments cannot overwrite each other
        let count: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE profiles
            SET prompt_count = prompt_count + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING prompt_count
            "#,
        )
        .bind(user_id.0)
        .bind(by)
        .fetch_optional(&self.pool)
        .await?;

        count.ok_or_else(|| StoreError::NotFound(format!("profile {}", user_id)))
    }

    async fn apply_premium_grant(&self, grant: &PremiumGrant) -> StoreResult<GrantOutcome> {
        let updated: Option<Profile> = sqlx::query_as(
            r#"
            UPDATE profiles
            SET total_prompts_limit = $2,
                is_premium = TRUE,
                has_prompt_history_access = TRUE,
                prompt_count = CASE WHEN $3 THEN 0 ELSE prompt_count END,
                allowance_period_start = CASE WHEN $3 THEN NOW() ELSE allowance_period_start END,
                last_payment_intent_id = $4,
                updated_at = NOW()
            WHERE id = $1
              AND total_prompts_limit = $5
              AND is_premium = $6
              AND last_payment_intent_id IS DISTINCT FROM $4
            RETURNING id, name, email, prompt_count, total_prompts_limit, is_premium,
                      has_prompt_history_access, allowance_period_start,
                      last_payment_intent_id, created_at, updated_at
            "#,
        )
        .bind(grant.user_id.0)
        .bind(grant.new_limit)
        .bind(grant.reset_prompt_count)
        .bind(&grant.payment_intent_id)
        .bind(grant.expected_limit)
        .bind(grant.expected_premium)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(profile) = updated {
            return Ok(GrantOutcome::Applied(profile));
        }

        // Nothing matched: either this grant already landed or the row moved on
        match self.get_profile(grant.user_id).await? {
            None => Err(StoreError::NotFound(format!("profile {}", grant.user_id))),
            Some(profile)
                if profile.last_payment_intent_id.as_deref() == Some(grant.payment_intent_id.as_str()) =>
            {
                Ok(GrantOutcome::AlreadyApplied(profile))
            }
            Some(profile) => {
                tracing::debug!(
                    user_id = %grant.user_id,
                    expected_limit = grant.expected_limit,
                    actual_limit = profile.total_prompts_limit,
                    "Premium grant lost a compare-and-set race"
                );
                Ok(GrantOutcome::Conflict)
            }
        }
    }

    async fn reset_allowance(&self, user_id: UserId, period_start: OffsetDateTime) -> StoreResult<Profile> {
        let profile: Option<Profile> = sqlx::query_as(
            r#"
            UPDATE profiles
            SET prompt_count = 0, allowance_period_start = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, email, prompt_count, total_prompts_limit, is_premium,
                      has_prompt_history_access, allowance_period_start,
                      last_payment_intent_id, created_at, updated_at
            "#,
        )
        .bind(user_id.0)
        .bind(period_start)
        .fetch_optional(&self.pool)
        .await?;

        profile.ok_or_else(|| StoreError::NotFound(format!("profile {}", user_id)))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PromptHistoryStore for PgStore {
    async fn insert_entry(&self, entry: &NewPromptHistoryEntry) -> StoreResult<PromptHistoryEntry> {
        let row: PromptHistoryEntry = sqlx::query_as(
            r#"
            INSERT INTO prompt_history (id, user_id, message, ai_response, tool_type)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, message, ai_response, tool_type, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.user_id.0)
        .bind(&entry.message)
        .bind(&entry.ai_response)
        .bind(entry.tool_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn count_entries(&self, user_id: UserId, since: Option<OffsetDateTime>) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM prompt_history
            WHERE user_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
            "#,
        )
        .bind(user_id.0)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn list_entries(&self, user_id: UserId, limit: i64) -> StoreResult<Vec<PromptHistoryEntry>> {
        let rows: Vec<PromptHistoryEntry> = sqlx::query_as(
            r#"
            SELECT id, user_id, message, ai_response, tool_type, created_at
            FROM prompt_history
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl PaymentLedger for PgStore {
    async fn has_payment(&self, payment_intent_id: &str) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM payments WHERE payment_intent_id = $1)",
        )
        .bind(payment_intent_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn record_payment(&self, record: &NewPaymentRecord) -> StoreResult<RecordOutcome> {
        let result = sqlx::query_as::<_, PaymentRecord>(
            r#"
            INSERT INTO payments (id, user_id, amount_cents, currency, status, payment_intent_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, amount_cents, currency, status, payment_intent_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.user_id.0)
        .bind(record.amount_cents)
        .bind(&record.currency)
        .bind(record.status)
        .bind(&record.payment_intent_id)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(RecordOutcome::Inserted(row)),
            // The unique index on payment_intent_id is the real idempotency guard
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Ok(RecordOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_payments(&self, user_id: UserId) -> StoreResult<Vec<PaymentRecord>> {
        let rows: Vec<PaymentRecord> = sqlx::query_as(
            r#"
            SELECT id, user_id, amount_cents, currency, status, payment_intent_id, created_at
            FROM payments
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl LedgerAudit for PgStore {
    async fn payments_without_premium(&self) -> StoreResult<Vec<UnappliedPayment>> {
        let rows: Vec<UnappliedPayment> = sqlx::query_as(
            r#"
            SELECT p.user_id, p.payment_intent_id, p.created_at
            FROM payments p
            JOIN profiles pr ON pr.id = p.user_id
            WHERE pr.is_premium = FALSE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn overdrawn_profiles(&self) -> StoreResult<Vec<OverdrawnProfile>> {
        let rows: Vec<OverdrawnProfile> = sqlx::query_as(
            r#"
            SELECT id AS user_id, prompt_count, total_prompts_limit, is_premium
            FROM profiles
            WHERE prompt_count > total_prompts_limit
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn trailing_counters(&self) -> StoreResult<Vec<CounterDrift>> {
        let rows: Vec<CounterDrift> = sqlx::query_as(
            r#"
            SELECT pr.id AS user_id, pr.prompt_count, COUNT(h.id) AS history_count
            FROM profiles pr
            JOIN prompt_history h
              ON h.user_id = pr.id AND h.created_at >= pr.allowance_period_start
            GROUP BY pr.id, pr.prompt_count
            HAVING COUNT(h.id) > pr.prompt_count
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
