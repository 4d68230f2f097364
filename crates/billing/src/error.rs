//! Billing error types

use metamind_shared::StoreError;
use thiserror::Error;

use crate::upgrade::UpgradeState;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook payload invalid: {0}")]
    WebhookPayload(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Prompt quota exceeded ({used} of {limit} used)")]
    QuotaExceeded { used: i64, limit: i32 },

    #[error("Payment not confirmed: {0}")]
    PaymentNotConfirmed(String),

    #[error("Concurrent modification detected: {0}")]
    ConcurrentModification(String),

    #[error("Upgrade failed at {stage}: {reason}")]
    UpgradeFailed {
        stage: UpgradeState,
        reason: String,
        retryable: bool,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether the client-polled success path should try again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::StripeApi(_) | Self::ConcurrentModification(_) => true,
            // Stripe may not have settled the charge yet
            Self::PaymentNotConfirmed(_) => true,
            Self::UpgradeFailed { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
