//! Test doubles shared by the integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metamind_billing::{
    BillingResult, ConfirmedPayment, PaymentConfirmer, PaymentSource, PremiumUpgradeProcessor,
    QuotaPolicy, QuotaReconciler, UserLocks,
};
use metamind_shared::{
    MemoryStore, NewPaymentRecord, NewPromptHistoryEntry, PaymentLedger, PaymentRecord,
    PromptHistoryStore, RecordOutcome, StoreError, StoreResult, ToolType, UserId,
};

/// Payment ledger that is unreachable for the first `failures` calls
pub struct FlakyLedger {
    inner: Arc<MemoryStore>,
    failures_left: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FlakyLedger {
    pub fn new(inner: Arc<MemoryStore>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }

    fn trip(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentLedger for FlakyLedger {
    async fn has_payment(&self, payment_intent_id: &str) -> StoreResult<bool> {
        self.trip()?;
        self.inner.has_payment(payment_intent_id).await
    }

    async fn record_payment(&self, record: &NewPaymentRecord) -> StoreResult<RecordOutcome> {
        self.inner.record_payment(record).await
    }

    async fn list_payments(&self, user_id: UserId) -> StoreResult<Vec<PaymentRecord>> {
        self.inner.list_payments(user_id).await
    }
}

/// Ledger whose inserts always fail, after the profile grant has landed
pub struct InsertFailsLedger {
    pub inner: Arc<MemoryStore>,
}

#[async_trait]
impl PaymentLedger for InsertFailsLedger {
    async fn has_payment(&self, payment_intent_id: &str) -> StoreResult<bool> {
        self.inner.has_payment(payment_intent_id).await
    }

    async fn record_payment(&self, _record: &NewPaymentRecord) -> StoreResult<RecordOutcome> {
        Err(StoreError::Unavailable("ledger write timed out".to_string()))
    }

    async fn list_payments(&self, user_id: UserId) -> StoreResult<Vec<PaymentRecord>> {
        self.inner.list_payments(user_id).await
    }
}

/// Confirms every payment intent for the caller
pub struct StubConfirmer;

#[async_trait]
impl PaymentConfirmer for StubConfirmer {
    async fn confirm(&self, user_id: UserId, payment_intent_id: &str) -> BillingResult<ConfirmedPayment> {
        Ok(ConfirmedPayment::premium_pack(
            user_id,
            payment_intent_id,
            PaymentSource::ClientPoll,
        ))
    }
}

pub fn reconciler(store: &Arc<MemoryStore>, locks: &UserLocks) -> QuotaReconciler {
    QuotaReconciler::new(store.clone(), store.clone(), QuotaPolicy::default(), locks.clone())
}

pub fn upgrades(store: &Arc<MemoryStore>, locks: &UserLocks) -> PremiumUpgradeProcessor {
    PremiumUpgradeProcessor::new(store.clone(), store.clone(), QuotaPolicy::default(), locks.clone())
}

pub async fn insert_history(store: &MemoryStore, user_id: UserId) {
    store
        .insert_entry(&NewPromptHistoryEntry {
            user_id,
            message: "a habit tracker for remote teams".to_string(),
            ai_response: "Build a responsive dashboard...".to_string(),
            tool_type: ToolType::Lovable,
        })
        .await
        .unwrap();
}
