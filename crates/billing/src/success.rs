//! Client-polled payment success path
//!
//! After Stripe redirects back, the success page asks the API to finish the
//! upgrade. Confirmation and the upgrade are retried with a fixed delay while
//! the failure looks transient, and the caller gets exactly one outcome.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metamind_shared::UserId;
use serde::Serialize;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

use crate::confirm::PaymentConfirmer;
use crate::error::{BillingError, BillingResult};
use crate::upgrade::{PremiumUpgradeProcessor, UpgradeOutcome};

/// Default total attempts for the success path
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Default delay between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuccessRetryConfig {
    /// Total attempts, including the first
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for SuccessRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl SuccessRetryConfig {
    /// `PAYMENT_SUCCESS_MAX_ATTEMPTS` and `PAYMENT_SUCCESS_RETRY_DELAY_MS`
    pub fn from_env() -> BillingResult<Self> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("PAYMENT_SUCCESS_MAX_ATTEMPTS") {
            config.max_attempts = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    BillingError::Config(format!(
                        "PAYMENT_SUCCESS_MAX_ATTEMPTS must be a positive integer, got {}",
                        raw
                    ))
                })?;
        }
        if let Ok(raw) = std::env::var("PAYMENT_SUCCESS_RETRY_DELAY_MS") {
            let ms: u64 = raw.trim().parse().map_err(|_| {
                BillingError::Config(format!(
                    "PAYMENT_SUCCESS_RETRY_DELAY_MS must be an integer, got {}",
                    raw
                ))
            })?;
            config.delay = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// The single result reported to the success page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SuccessOutcome {
    Upgraded {
        total_prompts_limit: i32,
        attempts: usize,
    },
    AlreadyApplied {
        total_prompts_limit: i32,
        attempts: usize,
    },
    Failed {
        message: String,
        attempts: usize,
        retryable: bool,
    },
}

impl SuccessOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

pub fn support_message(payment_intent_id: &str) -> String {
    format!(
        "We could not confirm your upgrade. If you were charged, contact support and quote payment reference {}.",
        payment_intent_id
    )
}

pub struct PaymentSuccessRunner {
    confirmer: Arc<dyn PaymentConfirmer>,
    upgrades: Arc<PremiumUpgradeProcessor>,
    retry: SuccessRetryConfig,
}

impl PaymentSuccessRunner {
    pub fn new(
        confirmer: Arc<dyn PaymentConfirmer>,
        upgrades: Arc<PremiumUpgradeProcessor>,
        retry: SuccessRetryConfig,
    ) -> Self {
        Self {
            confirmer,
            upgrades,
            retry,
        }
    }

    /// Confirm and apply, retrying transient failures up to `max_attempts` times
    pub async fn run(&self, user_id: UserId, payment_intent_id: &str) -> SuccessOutcome {
        let attempts = AtomicUsize::new(0);
        let strategy = FixedInterval::new(self.retry.delay).take(self.retry.max_attempts.saturating_sub(1));

        let result = RetryIf::spawn(
            strategy,
            || async {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                self.attempt(user_id, payment_intent_id, attempt).await
            },
            |err: &BillingError| err.is_retryable(),
        )
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match result {
            Ok(UpgradeOutcome::Applied { total_prompts_limit }) => SuccessOutcome::Upgraded {
                total_prompts_limit,
                attempts,
            },
            Ok(UpgradeOutcome::AlreadyApplied { total_prompts_limit }) => SuccessOutcome::AlreadyApplied {
                total_prompts_limit,
                attempts,
            },
            Err(err) => {
                tracing::error!(
                    user_id = %user_id,
                    payment_intent_id = %payment_intent_id,
                    attempts,
                    error = %err,
                    "Payment success handling gave up"
                );
                SuccessOutcome::Failed {
                    message: support_message(payment_intent_id),
                    attempts,
                    retryable: err.is_retryable(),
                }
            }
        }
    }

    async fn attempt(
        &self,
        user_id: UserId,
        payment_intent_id: &str,
        attempt: usize,
    ) -> BillingResult<UpgradeOutcome> {
        let result = async {
            let payment = self.confirmer.confirm(user_id, payment_intent_id).await?;
            self.upgrades.apply_upgrade(&payment).await
        }
        .await;

        if let Err(err) = &result {
            tracing::warn!(
                user_id = %user_id,
                payment_intent_id = %payment_intent_id,
                attempt,
                max_attempts = self.retry.max_attempts,
                retryable = err.is_retryable(),
                error = %err,
                "Payment success attempt failed"
            );
        }
        result
    }
}
