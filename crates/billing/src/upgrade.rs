//! Premium upgrade processing
//!
//! Turns a confirmed payment into exactly one quota grant. Both entry points
//! (the Stripe webhook and the client-polled success page) call
//! [`PremiumUpgradeProcessor::apply_upgrade`], and either may call it any
//! number of times for the same payment intent.
//!
//! Idempotency comes from three layers:
//!
//! 1. A ledger lookup by payment intent id (fast path for redeliveries).
//! 2. A conditional profile update that only applies while the profile still
//!    holds the limit it was computed from and has not recorded this payment
//!    intent as its last grant.
//! 3. The unique index on `payments.payment_intent_id`; a duplicate insert is
//!    success.
//!
//! Known residual window: if a newer payment's grant replaces
//! `last_payment_intent_id` before an older payment's ledger row is written,
//! a retry of the older payment passes both checks and grants a second time.
//! This needs two payments from the same user to interleave with a ledger
//! write failure and is accepted.

use std::sync::Arc;

use metamind_shared::{
    GrantOutcome, NewPaymentRecord, PaymentLedger, PaymentStatus, Profile, ProfileStore,
    RecordOutcome, UserId, FREE_PROMPT_LIMIT, PREMIUM_CURRENCY, PREMIUM_PRICE_CENTS,
};
use serde::Serialize;

use crate::error::{BillingError, BillingResult};
use crate::locks::UserLocks;
use crate::policy::QuotaPolicy;

/// Conditional grant attempts before giving up on a moving profile
pub const MAX_GRANT_ATTEMPTS: u32 = 3;

/// Upgrade state machine, one run per `apply_upgrade` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeState {
    Initiated,
    ConfirmedByProcessor,
    ProfileUpdated,
    PaymentRecorded,
    Done,
    Failed,
}

impl std::fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiated => write!(f, "INITIATED"),
            Self::ConfirmedByProcessor => write!(f, "CONFIRMED_BY_PROCESSOR"),
            Self::ProfileUpdated => write!(f, "PROFILE_UPDATED"),
            Self::PaymentRecorded => write!(f, "PAYMENT_RECORDED"),
            Self::Done => write!(f, "DONE"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Which entry point delivered the payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    Webhook,
    ClientPoll,
}

impl PaymentSource {
    /// Ledger status written for payments from this source
    pub fn ledger_status(&self) -> PaymentStatus {
        match self {
            Self::Webhook => PaymentStatus::Succeeded,
            Self::ClientPoll => PaymentStatus::Completed,
        }
    }
}

impl std::fmt::Display for PaymentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Webhook => write!(f, "webhook"),
            Self::ClientPoll => write!(f, "client_poll"),
        }
    }
}

/// A payment the processor has confirmed as succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedPayment {
    pub user_id: UserId,
    pub payment_intent_id: String,
    pub amount_cents: i32,
    pub currency: String,
    pub source: PaymentSource,
}

impl ConfirmedPayment {
    /// One premium pack at the standard price
    pub fn premium_pack(user_id: UserId, payment_intent_id: impl Into<String>, source: PaymentSource) -> Self {
        Self {
            user_id,
            payment_intent_id: payment_intent_id.into(),
            amount_cents: PREMIUM_PRICE_CENTS,
            currency: PREMIUM_CURRENCY.to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UpgradeOutcome {
    /// This call granted the bonus
    Applied { total_prompts_limit: i32 },
    /// The bonus for this payment intent was granted earlier
    AlreadyApplied { total_prompts_limit: i32 },
}

impl UpgradeOutcome {
    pub fn total_prompts_limit(&self) -> i32 {
        match self {
            Self::Applied { total_prompts_limit } | Self::AlreadyApplied { total_prompts_limit } => {
                *total_prompts_limit
            }
        }
    }

    pub fn was_applied_now(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

pub struct PremiumUpgradeProcessor {
    profiles: Arc<dyn ProfileStore>,
    payments: Arc<dyn PaymentLedger>,
    policy: QuotaPolicy,
    locks: UserLocks,
}

impl PremiumUpgradeProcessor {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        payments: Arc<dyn PaymentLedger>,
        policy: QuotaPolicy,
        locks: UserLocks,
    ) -> Self {
        Self {
            profiles,
            payments,
            policy,
            locks,
        }
    }

    /// Apply the premium grant for a confirmed payment, at most once per payment intent
    pub async fn apply_upgrade(&self, payment: &ConfirmedPayment) -> BillingResult<UpgradeOutcome> {
        if payment.payment_intent_id.trim().is_empty() {
            return Err(BillingError::InvalidInput(
                "payment_intent_id is required".to_string(),
            ));
        }

        self.transition(payment, UpgradeState::Initiated);
        // Both entry points confirm with Stripe before calling in
        self.transition(payment, UpgradeState::ConfirmedByProcessor);

        let _guard = self.locks.lock(payment.user_id).await;

        let already_recorded = self
            .payments
            .has_payment(&payment.payment_intent_id)
            .await
            .map_err(|e| self.fail(payment, UpgradeState::ConfirmedByProcessor, e.into()))?;

        if already_recorded {
            let limit = self
                .profiles
                .get_profile(payment.user_id)
                .await
                .map_err(|e| self.fail(payment, UpgradeState::ConfirmedByProcessor, e.into()))?
                .map_or(FREE_PROMPT_LIMIT, |p| p.total_prompts_limit);
            tracing::info!(
                user_id = %payment.user_id,
                payment_intent_id = %payment.payment_intent_id,
                source = %payment.source,
                "Payment already in ledger, skipping upgrade"
            );
            self.transition(payment, UpgradeState::Done);
            return Ok(UpgradeOutcome::AlreadyApplied {
                total_prompts_limit: limit,
            });
        }

        let (profile, applied_now) = self
            .grant(payment)
            .await
            .map_err(|e| self.fail(payment, UpgradeState::ConfirmedByProcessor, e))?;
        self.transition(payment, UpgradeState::ProfileUpdated);

        let record = NewPaymentRecord {
            user_id: payment.user_id,
            amount_cents: payment.amount_cents,
            currency: payment.currency.clone(),
            status: payment.source.ledger_status(),
            payment_intent_id: payment.payment_intent_id.clone(),
        };
        match self
            .payments
            .record_payment(&record)
            .await
            .map_err(|e| self.fail(payment, UpgradeState::ProfileUpdated, e.into()))?
        {
            RecordOutcome::Inserted(row) => {
                tracing::debug!(payment_id = %row.id, "Payment recorded");
            }
            RecordOutcome::Duplicate => {
                tracing::info!(
                    payment_intent_id = %payment.payment_intent_id,
                    "Payment recorded concurrently by another delivery"
                );
            }
        }
        self.transition(payment, UpgradeState::PaymentRecorded);
        self.transition(payment, UpgradeState::Done);

        let total_prompts_limit = profile.total_prompts_limit;
        if applied_now {
            tracing::info!(
                user_id = %payment.user_id,
                payment_intent_id = %payment.payment_intent_id,
                total_prompts_limit,
                "Premium upgrade applied"
            );
            Ok(UpgradeOutcome::Applied { total_prompts_limit })
        } else {
            Ok(UpgradeOutcome::AlreadyApplied { total_prompts_limit })
        }
    }

    /// Conditional grant, recomputed from a fresh read on conflict
    async fn grant(&self, payment: &ConfirmedPayment) -> BillingResult<(Profile, bool)> {
        for attempt in 1..=MAX_GRANT_ATTEMPTS {
            let profile = self.profiles.ensure_profile(payment.user_id, None).await?;
            let grant = self.policy.compute_grant(&profile, &payment.payment_intent_id);

            match self.profiles.apply_premium_grant(&grant).await? {
                GrantOutcome::Applied(updated) => return Ok((updated, true)),
                GrantOutcome::AlreadyApplied(current) => {
                    tracing::info!(
                        user_id = %payment.user_id,
                        payment_intent_id = %payment.payment_intent_id,
                        "Grant already on profile, completing ledger write"
                    );
                    return Ok((current, false));
                }
                GrantOutcome::Conflict => {
                    tracing::warn!(
                        user_id = %payment.user_id,
                        payment_intent_id = %payment.payment_intent_id,
                        attempt,
                        "Profile changed during grant, retrying"
                    );
                }
            }
        }

        Err(BillingError::ConcurrentModification(format!(
            "profile {} kept changing during premium grant",
            payment.user_id
        )))
    }

    fn transition(&self, payment: &ConfirmedPayment, state: UpgradeState) {
        tracing::debug!(
            user_id = %payment.user_id,
            payment_intent_id = %payment.payment_intent_id,
            source = %payment.source,
            state = %state,
            "Upgrade state"
        );
    }

    fn fail(&self, payment: &ConfirmedPayment, stage: UpgradeState, err: BillingError) -> BillingError {
        tracing::error!(
            user_id = %payment.user_id,
            payment_intent_id = %payment.payment_intent_id,
            source = %payment.source,
            state = %UpgradeState::Failed,
            stage = %stage,
            error = %err,
            "Premium upgrade failed"
        );
        BillingError::UpgradeFailed {
            stage,
            retryable: err.is_retryable(),
            reason: err.to_string(),
        }
    }
}
