//! Billing routes: payment intents, the success page and Stripe webhooks

use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use metamind_billing::{
    BillingError, PaymentIntentResponse, SuccessOutcome, UpgradeOutcome, WebhookDisposition,
};
use metamind_shared::{PaymentRecord, PaymentStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

#[derive(Debug, Serialize)]
pub struct CreatePaymentIntentResponse {
    pub success: bool,
    #[serde(flatten)]
    pub intent: PaymentIntentResponse,
}

#[derive(Debug, Deserialize)]
pub struct PaymentSuccessRequest {
    pub payment_intent_id: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentSuccessResponse {
    pub success: bool,
    pub outcome: SuccessOutcome,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub amount_cents: i32,
    pub amount: f64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_intent_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<PaymentRecord> for PaymentResponse {
    fn from(record: PaymentRecord) -> Self {
        Self {
            id: record.id,
            amount_cents: record.amount_cents,
            amount: record.amount(),
            currency: record.currency,
            status: record.status,
            payment_intent_id: record.payment_intent_id,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentsResponse {
    pub success: bool,
    pub payments: Vec<PaymentResponse>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub received: bool,
}

/// Create a premium-pack payment intent for the caller
pub async fn create_payment_intent(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<CreatePaymentIntentResponse>, ApiError> {
    let billing = state.billing()?;

    let intent = billing
        .payment_intents
        .create_for_user(auth_user.user_id, auth_user.email.as_deref())
        .await?;

    Ok(Json(CreatePaymentIntentResponse {
        success: true,
        intent,
    }))
}

/// Client-polled path after Stripe redirects back to the app
pub async fn payment_success(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<PaymentSuccessRequest>,
) -> Result<Json<PaymentSuccessResponse>, ApiError> {
    let billing = state.billing()?;

    let payment_intent_id = req.payment_intent_id.trim();
    if payment_intent_id.is_empty() {
        return Err(ApiError::Validation("payment_intent_id is required".to_string()));
    }

    let outcome = billing.success.run(auth_user.user_id, payment_intent_id).await;

    match outcome {
        SuccessOutcome::Failed {
            message, retryable, ..
        } => Err(ApiError::UpgradeFailed { message, retryable }),
        outcome => {
            if let Err(e) = state.sessions.force_refresh(auth_user.user_id).await {
                tracing::warn!(
                    user_id = %auth_user.user_id,
                    error = %e,
                    "Upgrade applied but session refresh failed"
                );
            }
            Ok(Json(PaymentSuccessResponse {
                success: true,
                outcome,
            }))
        }
    }
}

/// The caller's payment records, newest first
pub async fn list_payments(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<PaymentsResponse>, ApiError> {
    let payments = state
        .stores
        .payments
        .list_payments(auth_user.user_id)
        .await?
        .into_iter()
        .map(PaymentResponse::from)
        .collect();

    Ok(Json(PaymentsResponse {
        success: true,
        payments,
    }))
}

/// Handle Stripe webhook events
///
/// Signature and payload problems are answered with 400 so Stripe stops
/// retrying; processing failures return 500 so the event is redelivered.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<WebhookResponse>), ApiError> {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let billing = state.billing()?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::BadRequest("Missing Stripe signature".to_string())
        })?;

    let disposition = billing.webhooks.handle(&body, signature).await.map_err(|e| match e {
        BillingError::WebhookSignatureInvalid | BillingError::WebhookPayload(_) => {
            tracing::warn!(error = %e, "Rejected Stripe webhook");
            ApiError::from(e)
        }
        other => {
            tracing::error!(error = %other, "Webhook handling error");
            ApiError::Internal
        }
    })?;

    match disposition {
        WebhookDisposition::Upgraded {
            event_id,
            user_id,
            outcome,
        } => {
            tracing::info!(
                event_id = %event_id,
                user_id = %user_id,
                total_prompts_limit = outcome.total_prompts_limit(),
                applied_now = matches!(outcome, UpgradeOutcome::Applied { .. }),
                "Stripe webhook processed"
            );
            if let Err(e) = state.sessions.force_refresh(user_id).await {
                tracing::warn!(user_id = %user_id, error = %e, "Session refresh after webhook failed");
            }
        }
        WebhookDisposition::Ignored {
            event_id,
            event_type,
        } => {
            tracing::debug!(event_id = %event_id, event_type = %event_type, "Ignored Stripe webhook");
        }
    }

    Ok((
        StatusCode::OK,
        Json(WebhookResponse {
            success: true,
            received: true,
        }),
    ))
}
