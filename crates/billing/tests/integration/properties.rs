//! Properties that must hold over arbitrary operation sequences

use std::sync::Arc;

use metamind_billing::UserLocks;
use metamind_shared::{MemoryStore, ProfileStore, UserId};

use crate::support::{insert_history, reconciler};

/// Small deterministic generator so failures are reproducible
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

#[tokio::test]
async fn test_reconciled_count_never_regresses() {
    for seed in 1..=20_u64 {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(&store, &UserLocks::new());
        let user = UserId::new();
        store.ensure_profile(user, None).await.unwrap();

        let mut rng = Lcg(seed);
        let mut last_seen = 0_i64;
        for step in 0..40 {
            match rng.next() % 3 {
                // Full generation
                0 => {
                    insert_history(&store, user).await;
                    reconciler.increment_after_generation(user).await.unwrap();
                }
                // Counter write lost
                1 => insert_history(&store, user).await,
                // History write lost
                _ => {
                    reconciler.increment_after_generation(user).await.unwrap();
                }
            }

            let count = reconciler.reconcile_count(user).await.unwrap();
            assert!(
                count >= last_seen,
                "seed {} step {}: count went from {} to {}",
                seed,
                step,
                last_seen,
                count
            );
            last_seen = count;
        }
    }
}

#[tokio::test]
async fn test_quota_gate_blocks_exactly_at_limit() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&store, &UserLocks::new());
    let user = UserId::new();
    store.ensure_profile(user, None).await.unwrap();

    for used in 0..5 {
        let quota = reconciler.check_quota(user).await.unwrap();
        assert_eq!(quota.used, used);
        insert_history(&store, user).await;
    }
    // History alone is enough to close the gate
    assert!(reconciler.check_quota(user).await.is_err());
}
