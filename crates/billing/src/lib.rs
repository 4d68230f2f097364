// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! MetaMind Billing Module
//!
//! Quota reconciliation and premium upgrades for the prompt generator.
//!
//! ## Features
//!
//! - **Quota Policy**: the single place that decides grant, reset and revert rules
//! - **Reconciliation**: usage as max(counter, history rows), quota gate
//! - **Premium Upgrades**: idempotent grant per payment intent, from either entry point
//! - **Webhooks**: verified `payment_intent.succeeded` handling
//! - **Success Page**: bounded retries for the client-polled path
//! - **Invariants**: read-only consistency sweep

pub mod client;
pub mod confirm;
pub mod error;
pub mod invariants;
pub mod locks;
pub mod payment_intent;
pub mod policy;
pub mod quota;
pub mod success;
pub mod upgrade;
pub mod webhooks;


use std::sync::Arc;

use metamind_shared::Stores;

// Client
pub use client::{StripeClient, StripeConfig};

// Confirmation
pub use confirm::{PaymentConfirmer, StripePaymentConfirmer, USER_ID_METADATA_KEY};

// Error
pub use error::{BillingError, BillingResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Locks
pub use locks::{UserLockGuard, UserLocks};

// Payment intents
pub use payment_intent::{PaymentIntentResponse, PaymentIntentService};

// Policy
pub use policy::{AllowanceReset, EffectiveState, GrantPolicy, QuotaPolicy};

// Quota
pub use quota::{ensure_quota_available, QuotaReconciler, ReconciledQuota};

// Success page
pub use success::{support_message, PaymentSuccessRunner, SuccessOutcome, SuccessRetryConfig};

// Upgrades
pub use upgrade::{
    ConfirmedPayment, PaymentSource, PremiumUpgradeProcessor, UpgradeOutcome, UpgradeState,
    MAX_GRANT_ATTEMPTS,
};

// Webhooks
pub use webhooks::{sign_payload, verify_signature, WebhookDisposition, WebhookHandler};

/// Store-backed quota services, available with or without Stripe
#[derive(Clone)]
pub struct QuotaCore {
    pub reconciler: Arc<QuotaReconciler>,
    pub upgrades: Arc<PremiumUpgradeProcessor>,
    pub invariants: Arc<InvariantChecker>,
}

impl QuotaCore {
    /// Wire the reconciler and upgrade processor over one set of stores.
    /// Both share a lock table so their profile writes are serialized per user.
    pub fn new(stores: &Stores, policy: QuotaPolicy) -> Self {
        let locks = UserLocks::new();
        Self {
            reconciler: Arc::new(QuotaReconciler::new(
                stores.profiles.clone(),
                stores.history.clone(),
                policy.clone(),
                locks.clone(),
            )),
            upgrades: Arc::new(PremiumUpgradeProcessor::new(
                stores.profiles.clone(),
                stores.payments.clone(),
                policy,
                locks,
            )),
            invariants: Arc::new(InvariantChecker::new(stores.audit.clone())),
        }
    }
}

/// Stripe-facing billing services
pub struct BillingService {
    pub payment_intents: PaymentIntentService,
    pub webhooks: WebhookHandler,
    pub success: PaymentSuccessRunner,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(upgrades: Arc<PremiumUpgradeProcessor>) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        let retry = SuccessRetryConfig::from_env()?;
        Ok(Self::new(stripe, upgrades, retry))
    }

    /// Create a new billing service with explicit config
    pub fn new(
        stripe: StripeClient,
        upgrades: Arc<PremiumUpgradeProcessor>,
        retry: SuccessRetryConfig,
    ) -> Self {
        let confirmer: Arc<dyn PaymentConfirmer> = Arc::new(StripePaymentConfirmer::new(stripe.clone()));
        Self::with_confirmer(stripe, upgrades, confirmer, retry)
    }

    /// Same as [`BillingService::new`] with a custom payment confirmer
    pub fn with_confirmer(
        stripe: StripeClient,
        upgrades: Arc<PremiumUpgradeProcessor>,
        confirmer: Arc<dyn PaymentConfirmer>,
        retry: SuccessRetryConfig,
    ) -> Self {
        Self {
            payment_intents: PaymentIntentService::new(stripe.clone()),
            webhooks: WebhookHandler::new(stripe.config().webhook_secret.clone(), upgrades.clone()),
            success: PaymentSuccessRunner::new(confirmer, upgrades, retry),
        }
    }
}
