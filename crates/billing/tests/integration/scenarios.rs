//! End-to-end quota and payment scenarios

use std::sync::Arc;
use std::time::Duration;

use metamind_billing::{
    BillingError, ConfirmedPayment, PaymentSource, PaymentSuccessRunner, PremiumUpgradeProcessor,
    QuotaPolicy, SuccessOutcome, SuccessRetryConfig, UpgradeOutcome, UserLocks,
};
use metamind_shared::{
    MemoryStore, PaymentLedger, PaymentStatus, Profile, ProfileStore, UserId,
};
use time::OffsetDateTime;

use crate::support::{
    insert_history, reconciler, upgrades, FlakyLedger, InsertFailsLedger, StubConfirmer,
};

// ============================================================================
// Scenario 1: free user uses the whole allowance
// ============================================================================

#[tokio::test]
async fn test_free_user_blocked_after_five_prompts() {
    let store = Arc::new(MemoryStore::new());
    let locks = UserLocks::new();
    let reconciler = reconciler(&store, &locks);
    let user = UserId::new();
    store.ensure_profile(user, None).await.unwrap();

    for _ in 0..5 {
        reconciler.check_quota(user).await.unwrap();
        insert_history(&store, user).await;
        reconciler.increment_after_generation(user).await.unwrap();
    }

    let profile = store.get_profile(user).await.unwrap().unwrap();
    assert_eq!(profile.prompt_count, 5);

    let err = reconciler.check_quota(user).await.unwrap_err();
    assert!(matches!(err, BillingError::QuotaExceeded { used: 5, limit: 5 }));
}

// ============================================================================
// Scenario 2: free user pays once
// ============================================================================

#[tokio::test]
async fn test_free_user_payment_grants_premium() {
    let store = Arc::new(MemoryStore::new());
    let user = UserId::new();
    store.ensure_profile(user, None).await.unwrap();

    let outcome = upgrades(&store, &UserLocks::new())
        .apply_upgrade(&ConfirmedPayment::premium_pack(user, "pi_123", PaymentSource::Webhook))
        .await
        .unwrap();
    assert_eq!(outcome, UpgradeOutcome::Applied { total_prompts_limit: 155 });

    let profile = store.get_profile(user).await.unwrap().unwrap();
    assert_eq!(profile.total_prompts_limit, 155);
    assert!(profile.is_premium);
    assert!(profile.has_prompt_history_access);

    let payments = store.list_payments(user).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].payment_intent_id, "pi_123");
    assert_eq!(payments[0].amount_cents, 399);
    assert!((payments[0].amount() - 3.99).abs() < f64::EPSILON);
    assert_eq!(payments[0].status, PaymentStatus::Succeeded);
}

// ============================================================================
// Scenario 3: the same webhook delivered twice
// ============================================================================

#[tokio::test]
async fn test_webhook_redelivery_does_not_double_grant() {
    let store = Arc::new(MemoryStore::new());
    let user = UserId::new();
    store.ensure_profile(user, None).await.unwrap();
    let processor = upgrades(&store, &UserLocks::new());
    let payment = ConfirmedPayment::premium_pack(user, "pi_123", PaymentSource::Webhook);

    processor.apply_upgrade(&payment).await.unwrap();
    let second = processor.apply_upgrade(&payment).await.unwrap();

    assert_eq!(second, UpgradeOutcome::AlreadyApplied { total_prompts_limit: 155 });
    let profile = store.get_profile(user).await.unwrap().unwrap();
    assert_eq!(profile.total_prompts_limit, 155, "must stay at 155, not 305");
    assert_eq!(store.payment_count().await, 1);
}

// ============================================================================
// Scenario 4: counter and history disagree
// ============================================================================

#[tokio::test]
async fn test_reconcile_trusts_higher_counter() {
    let store = Arc::new(MemoryStore::new());
    let user = UserId::new();
    let mut profile = Profile::new_free(user, None, OffsetDateTime::now_utc());
    profile.prompt_count = 3;
    store.put_profile(profile).await;
    insert_history(&store, user).await;
    insert_history(&store, user).await;

    let count = reconciler(&store, &UserLocks::new())
        .reconcile_count(user)
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_reconcile_trusts_higher_history() {
    let store = Arc::new(MemoryStore::new());
    let user = UserId::new();
    let mut profile = Profile::new_free(user, None, OffsetDateTime::now_utc());
    profile.prompt_count = 2;
    store.put_profile(profile).await;
    for _ in 0..4 {
        insert_history(&store, user).await;
    }

    let count = reconciler(&store, &UserLocks::new())
        .reconcile_count(user)
        .await
        .unwrap();
    assert_eq!(count, 4);
}

// ============================================================================
// Scenario 5: success page retries through a store outage
// ============================================================================

#[tokio::test]
async fn test_success_page_survives_four_store_failures() {
    let store = Arc::new(MemoryStore::new());
    let user = UserId::new();
    store.ensure_profile(user, None).await.unwrap();

    let ledger = Arc::new(FlakyLedger::new(store.clone(), 4));
    let processor = PremiumUpgradeProcessor::new(
        store.clone(),
        ledger.clone(),
        QuotaPolicy::default(),
        UserLocks::new(),
    );
    let runner = PaymentSuccessRunner::new(
        Arc::new(StubConfirmer),
        Arc::new(processor),
        SuccessRetryConfig {
            max_attempts: 5,
            delay: Duration::from_millis(5),
        },
    );

    let outcome = runner.run(user, "pi_123").await;

    // One outcome for the caller, reached on the fifth attempt
    assert_eq!(
        outcome,
        SuccessOutcome::Upgraded {
            total_prompts_limit: 155,
            attempts: 5
        }
    );
    assert_eq!(ledger.calls.load(std::sync::atomic::Ordering::SeqCst), 5);

    let profile = store.get_profile(user).await.unwrap().unwrap();
    assert_eq!(profile.total_prompts_limit, 155);
    assert!(profile.is_premium);
    assert!(profile.has_prompt_history_access);
    let payments = store.list_payments(user).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Completed);
}

#[tokio::test]
async fn test_success_page_reports_support_message_when_outage_outlasts_retries() {
    let store = Arc::new(MemoryStore::new());
    let user = UserId::new();
    let ledger = Arc::new(FlakyLedger::new(store.clone(), 10));
    let processor = PremiumUpgradeProcessor::new(
        store.clone(),
        ledger,
        QuotaPolicy::default(),
        UserLocks::new(),
    );
    let runner = PaymentSuccessRunner::new(
        Arc::new(StubConfirmer),
        Arc::new(processor),
        SuccessRetryConfig {
            max_attempts: 5,
            delay: Duration::from_millis(1),
        },
    );

    match runner.run(user, "pi_down").await {
        SuccessOutcome::Failed { message, attempts, .. } => {
            assert_eq!(attempts, 5);
            assert!(message.contains("support"));
            assert!(message.contains("pi_down"));
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(store.payment_count().await, 0);
}

// ============================================================================
// Partial upgrade: profile written, ledger write failed, then retried
// ============================================================================

#[tokio::test]
async fn test_retry_after_ledger_failure_grants_once() {
    let store = Arc::new(MemoryStore::new());
    let user = UserId::new();
    store.ensure_profile(user, None).await.unwrap();
    let payment = ConfirmedPayment::premium_pack(user, "pi_partial", PaymentSource::Webhook);

    let broken = PremiumUpgradeProcessor::new(
        store.clone(),
        Arc::new(InsertFailsLedger { inner: store.clone() }),
        QuotaPolicy::default(),
        UserLocks::new(),
    );
    let err = broken.apply_upgrade(&payment).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(
        store.get_profile(user).await.unwrap().unwrap().total_prompts_limit,
        155
    );
    assert!(!store.has_payment("pi_partial").await.unwrap());

    // Stripe redelivers once the ledger is back
    let outcome = upgrades(&store, &UserLocks::new())
        .apply_upgrade(&payment)
        .await
        .unwrap();
    assert_eq!(outcome, UpgradeOutcome::AlreadyApplied { total_prompts_limit: 155 });
    assert!(store.has_payment("pi_partial").await.unwrap());
    assert_eq!(
        store.get_profile(user).await.unwrap().unwrap().total_prompts_limit,
        155
    );
}
