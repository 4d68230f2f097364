//! In-memory session cache with TTL
//!
//! Caches reconciled quota views so the UI can poll the profile without a
//! store round-trip every time. Writes that change quota (a generation, an
//! upgrade) call [`SessionCache::force_refresh`] so the next read is exact.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metamind_billing::{BillingResult, QuotaReconciler, ReconciledQuota};
use metamind_shared::UserId;
use serde::Serialize;
use tokio::sync::RwLock;

use super::snapshot::{SessionSnapshot, SnapshotStore};

/// Default cache TTL (5 minutes)
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(300);

/// Upper bound on cached users; the oldest entry is evicted past it
const MAX_CACHE_ENTRIES: usize = 10_000;

struct CacheEntry {
    quota: ReconciledQuota,
    cached_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Where an advisory view came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisorySource {
    Memory,
    Persisted,
}

/// A possibly stale view, for display only
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvisoryQuota {
    pub snapshot: SessionSnapshot,
    pub source: AdvisorySource,
}

/// Cache statistics
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SessionCacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Clone)]
pub struct SessionCache {
    reconciler: Arc<QuotaReconciler>,
    snapshots: Arc<dyn SnapshotStore>,
    entries: Arc<RwLock<HashMap<UserId, CacheEntry>>>,
    counters: Arc<Counters>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(reconciler: Arc<QuotaReconciler>, snapshots: Arc<dyn SnapshotStore>, ttl: Duration) -> Self {
        Self {
            reconciler,
            snapshots,
            entries: Arc::new(RwLock::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
            ttl,
        }
    }

    /// Cached view if still within TTL, otherwise a live reconcile
    pub async fn get(&self, user_id: UserId) -> BillingResult<ReconciledQuota> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&user_id) {
                if !entry.is_expired(self.ttl) {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(entry.quota.clone());
                }
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.refresh(user_id).await
    }

    /// Bypass the TTL and reconcile now
    pub async fn force_refresh(&self, user_id: UserId) -> BillingResult<ReconciledQuota> {
        self.refresh(user_id).await
    }

    async fn refresh(&self, user_id: UserId) -> BillingResult<ReconciledQuota> {
        let quota = self.reconciler.reconcile(user_id).await?;

        {
            let mut entries = self.entries.write().await;
            if entries.len() >= MAX_CACHE_ENTRIES && !entries.contains_key(&user_id) {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.cached_at)
                    .map(|(k, _)| *k)
                {
                    entries.remove(&oldest);
                }
            }
            entries.insert(
                user_id,
                CacheEntry {
                    quota: quota.clone(),
                    cached_at: Instant::now(),
                },
            );
        }

        if let Err(e) = self.snapshots.save(&SessionSnapshot::from(&quota)).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to persist session snapshot");
        }
        Ok(quota)
    }

    /// Drop everything known about a user (sign-in, sign-out)
    pub async fn invalidate(&self, user_id: UserId) {
        self.entries.write().await.remove(&user_id);
        if let Err(e) = self.snapshots.remove(user_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to remove session snapshot");
        }
        tracing::debug!(user_id = %user_id, "Session invalidated");
    }

    /// Last known view without touching the store, never for enforcement
    pub async fn peek_advisory(&self, user_id: UserId) -> Option<AdvisoryQuota> {
        if let Some(entry) = self.entries.read().await.get(&user_id) {
            return Some(AdvisoryQuota {
                snapshot: SessionSnapshot::from(&entry.quota),
                source: AdvisorySource::Memory,
            });
        }
        match self.snapshots.load(user_id).await {
            Ok(Some(snapshot)) => Some(AdvisoryQuota {
                snapshot,
                source: AdvisorySource::Persisted,
            }),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to read session snapshot");
                None
            }
        }
    }

    /// Clear expired entries; returns how many were removed
    pub async fn cleanup(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(self.ttl));
        before - entries.len()
    }

    pub async fn stats(&self) -> SessionCacheStats {
        let entries = self.entries.read().await;
        let total = entries.len();
        let expired = entries.values().filter(|e| e.is_expired(self.ttl)).count();
        SessionCacheStats {
            total_entries: total,
            expired_entries: expired,
            active_entries: total - expired,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }
}
