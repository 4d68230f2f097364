//! Prompt generation and history routes

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use metamind_billing::ReconciledQuota;
use metamind_shared::{PromptHistoryEntry, ToolType};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiError, routes::profile::ProfileView, state::AppState};

const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub tool: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub tool: ToolType,
    pub content: String,
    /// Absent when the post-generation refresh failed; the client should refetch
    pub quota: Option<ProfileView>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntryResponse {
    pub id: Uuid,
    pub message: String,
    pub ai_response: String,
    pub tool_type: ToolType,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<PromptHistoryEntry> for HistoryEntryResponse {
    fn from(entry: PromptHistoryEntry) -> Self {
        Self {
            id: entry.id,
            message: entry.message,
            ai_response: entry.ai_response,
            tool_type: entry.tool_type,
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub entries: Vec<HistoryEntryResponse>,
}

/// Generate a tool-specific prompt from the caller's product idea
pub async fn generate(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let tool: ToolType = req.tool.parse().map_err(ApiError::Validation)?;

    // A dropped request (client disconnect) cancels the provider call
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let generated = state
        .generation
        .generate(&auth_user, tool, &req.message, cancel)
        .await?;

    Ok(Json(GenerateResponse {
        success: true,
        tool: generated.tool,
        content: generated.content,
        quota: generated.quota.as_ref().map(ProfileView::from),
    }))
}

/// Newest-first prompt history; premium purchasers only
pub async fn history(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let quota = state.sessions.get(auth_user.user_id).await?;
    if !has_history_access(&state, &quota).await? {
        return Err(ApiError::HistoryAccessRequired);
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let entries = state
        .stores
        .history
        .list_entries(auth_user.user_id, limit)
        .await?
        .into_iter()
        .map(HistoryEntryResponse::from)
        .collect();

    Ok(Json(HistoryResponse {
        success: true,
        entries,
    }))
}

/// Access is only ever granted, so a cached denial is re-checked live
async fn has_history_access(state: &AppState, cached: &ReconciledQuota) -> Result<bool, ApiError> {
    if cached.has_prompt_history_access {
        return Ok(true);
    }
    let live = state.sessions.force_refresh(cached.user_id).await?;
    Ok(live.has_prompt_history_access)
}
