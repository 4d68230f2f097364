//! Profile and session routes

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use metamind_billing::{BillingError, ReconciledQuota};
use metamind_shared::{ProfileUpdate, StoreError, UserId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    auth::AuthUser,
    error::ApiError,
    session::{AdvisoryQuota, AdvisorySource},
    state::AppState,
};

const MAX_NAME_CHARS: usize = 100;

/// Quota view shown in the UI header and on the account page
#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub id: UserId,
    pub name: Option<String>,
    pub email: Option<String>,
    pub prompt_count: i64,
    pub total_prompts_limit: i32,
    pub remaining: i64,
    pub is_premium: bool,
    pub has_prompt_history_access: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    /// True when served from a possibly stale snapshot because the store was unreachable
    pub advisory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisory_source: Option<AdvisorySource>,
}

impl From<&ReconciledQuota> for ProfileView {
    fn from(quota: &ReconciledQuota) -> Self {
        let profile = quota.profile.as_ref();
        Self {
            id: quota.user_id,
            name: profile.and_then(|p| p.name.clone()),
            email: profile.and_then(|p| p.email.clone()),
            prompt_count: quota.used,
            total_prompts_limit: quota.limit,
            remaining: quota.remaining,
            is_premium: quota.is_premium,
            has_prompt_history_access: quota.has_prompt_history_access,
            fetched_at: quota.fetched_at,
            advisory: false,
            advisory_source: None,
        }
    }
}

impl From<AdvisoryQuota> for ProfileView {
    fn from(advisory: AdvisoryQuota) -> Self {
        let snapshot = advisory.snapshot;
        Self {
            id: snapshot.user_id,
            name: None,
            email: None,
            prompt_count: snapshot.used,
            total_prompts_limit: snapshot.limit,
            remaining: snapshot.remaining,
            is_premium: snapshot.is_premium,
            has_prompt_history_access: snapshot.has_prompt_history_access,
            fetched_at: snapshot.fetched_at,
            advisory: true,
            advisory_source: Some(advisory.source),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub success: bool,
    pub profile: ProfileView,
}

impl ProfileResponse {
    fn new(profile: ProfileView) -> Json<Self> {
        Json(Self {
            success: true,
            profile,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: String,
}

/// Cached quota view; creates the free-tier profile on first sign-in
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let quota = match state.sessions.get(auth_user.user_id).await {
        Ok(quota) => quota,
        Err(BillingError::Store(StoreError::Unavailable(reason))) => {
            tracing::warn!(user_id = %auth_user.user_id, reason = %reason, "Store unavailable, trying advisory snapshot");
            return match state.sessions.peek_advisory(auth_user.user_id).await {
                Some(advisory) => Ok(ProfileResponse::new(advisory.into())),
                None => Err(ApiError::ServiceUnavailable),
            };
        }
        Err(e) => return Err(e.into()),
    };

    if quota.profile.is_some() {
        return Ok(ProfileResponse::new((&quota).into()));
    }

    state
        .stores
        .profiles
        .ensure_profile(auth_user.user_id, auth_user.email.as_deref())
        .await?;
    tracing::info!(user_id = %auth_user.user_id, "Created free-tier profile");

    let quota = state.sessions.force_refresh(auth_user.user_id).await?;
    Ok(ProfileResponse::new((&quota).into()))
}

/// Change the display name
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Name cannot be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(ApiError::Validation(format!(
            "Name must be at most {} characters",
            MAX_NAME_CHARS
        )));
    }

    let profiles = &state.stores.profiles;
    profiles
        .ensure_profile(auth_user.user_id, auth_user.email.as_deref())
        .await?;
    profiles
        .update_profile(
            auth_user.user_id,
            &ProfileUpdate {
                name: Some(name.to_string()),
                ..Default::default()
            },
        )
        .await?;

    let quota = state.sessions.force_refresh(auth_user.user_id).await?;
    Ok(ProfileResponse::new((&quota).into()))
}

/// Bypass the session cache
pub async fn refresh_profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let quota = state.sessions.force_refresh(auth_user.user_id).await?;
    Ok(ProfileResponse::new((&quota).into()))
}

/// Called by the client on sign-in and sign-out
pub async fn invalidate_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> StatusCode {
    state.sessions.invalidate(auth_user.user_id).await;
    StatusCode::NO_CONTENT
}
