//! Application state

use std::sync::Arc;
use std::time::Duration;

use metamind_billing::{BillingService, QuotaCore, QuotaPolicy};
use metamind_shared::Stores;

use crate::{
    auth::{AuthState, JwtManager},
    config::Config,
    generation::GenerationService,
    llm::LlmProvider,
    session::{SessionCache, SnapshotStore},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub stores: Stores,
    pub quota: QuotaCore,
    /// Stripe services; None when billing is disabled or not configured
    pub billing: Option<Arc<BillingService>>,
    pub sessions: SessionCache,
    pub generation: Arc<GenerationService>,
    pub jwt_manager: JwtManager,
}

impl AppState {
    pub fn new(
        config: Config,
        stores: Stores,
        policy: QuotaPolicy,
        llm: Arc<dyn LlmProvider>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        let quota = QuotaCore::new(&stores, policy);

        let billing = if config.enable_billing {
            match BillingService::from_env(quota.upgrades.clone()) {
                Ok(svc) => {
                    tracing::info!("Stripe billing service initialized");
                    Some(Arc::new(svc))
                }
                Err(e) => {
                    tracing::warn!("Stripe billing not configured: {}", e);
                    None
                }
            }
        } else {
            tracing::info!("Billing disabled via config (ENABLE_BILLING=false)");
            None
        };

        Self::with_billing(config, stores, quota, billing, llm, snapshots)
    }

    /// Assemble state around an already built billing service
    pub fn with_billing(
        config: Config,
        stores: Stores,
        quota: QuotaCore,
        billing: Option<Arc<BillingService>>,
        llm: Arc<dyn LlmProvider>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        let sessions = SessionCache::new(
            quota.reconciler.clone(),
            snapshots,
            Duration::from_secs(config.session_ttl_secs),
        );
        let generation = Arc::new(GenerationService::new(
            llm,
            sessions.clone(),
            quota.reconciler.clone(),
            stores.profiles.clone(),
            stores.history.clone(),
            Duration::from_secs(config.generation_timeout_secs),
        ));
        let jwt_manager = JwtManager::new(&config.supabase_jwt_secret);

        Self {
            config,
            stores,
            quota,
            billing,
            sessions,
            generation,
            jwt_manager,
        }
    }

    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
        }
    }

    pub fn billing(&self) -> Result<&Arc<BillingService>, crate::error::ApiError> {
        self.billing.as_ref().ok_or(crate::error::ApiError::BillingDisabled)
    }
}
