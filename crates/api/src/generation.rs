//! Prompt generation flow
//!
//! Quota gate, LLM call, then the two usage writes. The LLM call races the
//! caller's cancellation token and a timeout; nothing is written unless it
//! returns text.

use std::sync::Arc;
use std::time::Duration;

use metamind_billing::{ensure_quota_available, BillingError, QuotaReconciler, ReconciledQuota};
use metamind_shared::{
    NewPromptHistoryEntry, ProfileStore, PromptHistoryStore, StoreError, ToolType, UserId,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthUser;
use crate::llm::LlmProvider;
use crate::session::SessionCache;

/// Longest accepted product idea, in characters
pub const MAX_IDEA_CHARS: usize = 4000;

/// Default LLM timeout
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Prompt quota exceeded ({used} of {limit} used)")]
    QuotaExceeded { used: i64, limit: i32 },

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Generation timed out")]
    TimedOut,

    #[error("LLM provider error: {0}")]
    Upstream(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Quota(BillingError),
}

impl From<BillingError> for GenerationError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::QuotaExceeded { used, limit } => Self::QuotaExceeded { used, limit },
            BillingError::Store(e) => Self::Store(e),
            other => Self::Quota(other),
        }
    }
}

/// A delivered prompt and the quota after it was counted
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedPrompt {
    pub content: String,
    pub tool: ToolType,
    /// None when the post-write refresh failed
    pub quota: Option<ReconciledQuota>,
}

pub struct GenerationService {
    llm: Arc<dyn LlmProvider>,
    sessions: SessionCache,
    reconciler: Arc<QuotaReconciler>,
    profiles: Arc<dyn ProfileStore>,
    history: Arc<dyn PromptHistoryStore>,
    timeout: Duration,
}

impl GenerationService {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        sessions: SessionCache,
        reconciler: Arc<QuotaReconciler>,
        profiles: Arc<dyn ProfileStore>,
        history: Arc<dyn PromptHistoryStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            sessions,
            reconciler,
            profiles,
            history,
            timeout,
        }
    }

    pub async fn generate(
        &self,
        user: &AuthUser,
        tool: ToolType,
        idea: &str,
        cancel: CancellationToken,
    ) -> Result<GeneratedPrompt, GenerationError> {
        let idea = idea.trim();
        if idea.is_empty() {
            return Err(GenerationError::InvalidInput("Please describe your product idea".to_string()));
        }
        if idea.chars().count() > MAX_IDEA_CHARS {
            return Err(GenerationError::InvalidInput(format!(
                "Product idea must be at most {} characters",
                MAX_IDEA_CHARS
            )));
        }

        let quota = self.admit(user.user_id).await?;
        if quota.profile.is_none() {
            // History rows reference the profile
            self.profiles
                .ensure_profile(user.user_id, user.email.as_deref())
                .await?;
        }

        tracing::info!(
            user_id = %user.user_id,
            tool = %tool,
            provider = self.llm.name(),
            used = quota.used,
            limit = quota.limit,
            "Generating prompt"
        );

        let content = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(user_id = %user.user_id, "Generation cancelled by caller");
                return Err(GenerationError::Cancelled);
            }
            result = tokio::time::timeout(self.timeout, self.llm.generate(tool, idea)) => match result {
                Err(_) => {
                    tracing::warn!(user_id = %user.user_id, timeout_secs = self.timeout.as_secs(), "LLM call timed out");
                    return Err(GenerationError::TimedOut);
                }
                Ok(Err(e)) => {
                    tracing::error!(user_id = %user.user_id, provider = self.llm.name(), error = %e, "LLM call failed");
                    return Err(GenerationError::Upstream(e.to_string()));
                }
                Ok(Ok(text)) => text,
            },
        };

        self.record_usage(user.user_id, tool, idea, &content).await?;

        let quota = match self.sessions.force_refresh(user.user_id).await {
            Ok(quota) => Some(quota),
            Err(e) => {
                tracing::warn!(user_id = %user.user_id, error = %e, "Session refresh after generation failed");
                None
            }
        };

        Ok(GeneratedPrompt { content, tool, quota })
    }

    /// Quota gate. Always reconciled live: another process may have spent the
    /// last prompt or applied an upgrade since the cache entry was written.
    async fn admit(&self, user_id: UserId) -> Result<ReconciledQuota, GenerationError> {
        let live = self.sessions.force_refresh(user_id).await?;
        ensure_quota_available(&live)?;
        Ok(live)
    }

    /// History row first, then the counter. Reconciliation covers one of them failing.
    async fn record_usage(
        &self,
        user_id: UserId,
        tool: ToolType,
        idea: &str,
        content: &str,
    ) -> Result<(), GenerationError> {
        let history_result = self
            .history
            .insert_entry(&NewPromptHistoryEntry {
                user_id,
                message: idea.to_string(),
                ai_response: content.to_string(),
                tool_type: tool,
            })
            .await;
        if let Err(e) = &history_result {
            tracing::error!(user_id = %user_id, error = %e, "Failed to save prompt history");
        }

        let counter_result = self.reconciler.increment_after_generation(user_id).await;
        if let Err(e) = &counter_result {
            tracing::error!(user_id = %user_id, error = %e, "Failed to increment prompt count");
        }

        match (history_result, counter_result) {
            (Err(e), Err(_)) => Err(GenerationError::Store(e)),
            _ => Ok(()),
        }
    }
}
