//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metamind_billing::BillingError;
use metamind_shared::StoreError;
use serde_json::json;

use crate::generation::GenerationError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Authentication required")]
    AuthRequired,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Prompt history requires a premium purchase")]
    HistoryAccessRequired,
    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,

    // Quota and billing
    #[error("Prompt quota exceeded ({used} of {limit} used)")]
    QuotaExceeded { used: i64, limit: i32 },
    #[error("Payment not confirmed: {0}")]
    PaymentNotConfirmed(String),
    #[error("{message}")]
    UpgradeFailed { message: String, retryable: bool },
    #[error("Billing is not configured")]
    BillingDisabled,

    // Generation
    #[error("Prompt generation failed: {0}")]
    Upstream(String),
    #[error("Prompt generation timed out")]
    GenerationTimeout,
    #[error("Prompt generation cancelled")]
    Cancelled,

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::AuthRequired => (StatusCode::UNAUTHORIZED, "AUTH_REQUIRED", self.to_string()),
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::HistoryAccessRequired => (StatusCode::FORBIDDEN, "HISTORY_ACCESS_REQUIRED", self.to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),

            // Quota and billing
            ApiError::QuotaExceeded { .. } => (StatusCode::PAYMENT_REQUIRED, "QUOTA_EXCEEDED", self.to_string()),
            ApiError::PaymentNotConfirmed(msg) => (StatusCode::CONFLICT, "PAYMENT_NOT_CONFIRMED", msg.clone()),
            ApiError::UpgradeFailed { message, retryable: true } => (StatusCode::SERVICE_UNAVAILABLE, "UPGRADE_FAILED", message.clone()),
            ApiError::UpgradeFailed { message, retryable: false } => (StatusCode::BAD_REQUEST, "UPGRADE_FAILED", message.clone()),
            ApiError::BillingDisabled => (StatusCode::SERVICE_UNAVAILABLE, "BILLING_DISABLED", self.to_string()),

            // Generation
            ApiError::Upstream(_) => (StatusCode::BAD_GATEWAY, "GENERATION_FAILED", "The AI provider could not generate a prompt. Please try again.".to_string()),
            ApiError::GenerationTimeout => (StatusCode::GATEWAY_TIMEOUT, "GENERATION_TIMEOUT", self.to_string()),
            ApiError::Cancelled => (StatusCode::REQUEST_TIMEOUT, "CANCELLED", self.to_string()),

            // Internal
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
            ApiError::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", self.to_string()),
        };

        let body = Json(json!({
            "success": false,
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Store error");
        match err {
            StoreError::NotFound(_) => ApiError::NotFound,
            StoreError::Unavailable(_) => ApiError::ServiceUnavailable,
            StoreError::Conflict(msg) => ApiError::BadRequest(msg),
            StoreError::Database(msg) => ApiError::Database(msg),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Store(e) => e.into(),
            BillingError::QuotaExceeded { used, limit } => ApiError::QuotaExceeded { used, limit },
            BillingError::InvalidInput(msg) => ApiError::Validation(msg),
            BillingError::NotFound(_) => ApiError::NotFound,
            BillingError::Unauthorized(msg) => ApiError::Forbidden(msg),
            BillingError::PaymentNotConfirmed(msg) => ApiError::PaymentNotConfirmed(msg),
            BillingError::WebhookSignatureInvalid => ApiError::BadRequest("Invalid webhook signature".to_string()),
            BillingError::WebhookPayload(msg) => ApiError::BadRequest(msg),
            BillingError::UpgradeFailed { reason, retryable, .. } => ApiError::UpgradeFailed {
                message: reason,
                retryable,
            },
            BillingError::StripeApi(msg) => {
                tracing::error!(error = %msg, "Stripe API error");
                ApiError::ServiceUnavailable
            }
            BillingError::ConcurrentModification(_) => ApiError::ServiceUnavailable,
            BillingError::Config(msg) | BillingError::Internal(msg) => {
                tracing::error!(error = %msg, "Billing internal error");
                ApiError::Internal
            }
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::InvalidInput(msg) => ApiError::Validation(msg),
            GenerationError::QuotaExceeded { used, limit } => ApiError::QuotaExceeded { used, limit },
            GenerationError::Cancelled => ApiError::Cancelled,
            GenerationError::TimedOut => ApiError::GenerationTimeout,
            GenerationError::Upstream(msg) => ApiError::Upstream(msg),
            GenerationError::Store(e) => e.into(),
            GenerationError::Quota(e) => e.into(),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let (status, body) = render(ApiError::QuotaExceeded { used: 5, limit: 5 }).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "QUOTA_EXCEEDED");
        assert!(body["error"]["message"].as_str().unwrap().contains("5 of 5"));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        assert_eq!(render(ApiError::AuthRequired).await.0, StatusCode::UNAUTHORIZED);
        assert_eq!(render(ApiError::HistoryAccessRequired).await.0, StatusCode::FORBIDDEN);
        assert_eq!(render(ApiError::Validation("x".into())).await.0, StatusCode::BAD_REQUEST);
        assert_eq!(render(ApiError::Upstream("x".into())).await.0, StatusCode::BAD_GATEWAY);
        assert_eq!(render(ApiError::GenerationTimeout).await.0, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            render(StoreError::Unavailable("down".into()).into()).await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            render(StoreError::Database("boom".into()).into()).await.0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_database_detail_not_leaked() {
        let (_, body) = render(ApiError::Database("relation profiles does not exist".into())).await;
        assert_eq!(body["error"]["message"], "Database error");
    }

    #[test]
    fn test_billing_quota_error_maps_to_quota() {
        let err: ApiError = BillingError::QuotaExceeded { used: 7, limit: 5 }.into();
        assert!(matches!(err, ApiError::QuotaExceeded { used: 7, limit: 5 }));
    }
}
