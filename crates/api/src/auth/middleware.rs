//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use metamind_shared::UserId;

use super::jwt::JwtManager;
use crate::error::ApiError;

/// Authenticated caller, inserted into request extensions by [`require_auth`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub email: Option<String>,
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
}

fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn authenticate(auth_state: &AuthState, token: &str) -> Result<AuthUser, ApiError> {
    let claims = auth_state
        .jwt_manager
        .validate_supabase_token(token)
        .map_err(|e| {
            tracing::debug!(error = %e, "Supabase token rejected");
            ApiError::InvalidToken
        })?;
    let user_id = claims.user_id().map_err(|_| ApiError::InvalidToken)?;
    Ok(AuthUser {
        user_id,
        email: claims.email,
    })
}

/// Middleware that requires a valid Supabase bearer token
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let auth_result = match extract_bearer_token(&request) {
        Some(token) => authenticate(&auth_state, token),
        None => Err(ApiError::AuthRequired),
    };

    match auth_result {
        Ok(auth_user) => {
            tracing::debug!(path = %path, user_id = %auth_user.user_id, "require_auth: authenticated");
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "require_auth: authentication failed");
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::test_tokens::{token_for, TEST_SECRET};
    use axum::{body::Body, http::StatusCode, routing::get, Extension, Router};
    use tower::ServiceExt;

    async fn whoami(Extension(user): Extension<AuthUser>) -> String {
        user.user_id.to_string()
    }

    fn app() -> Router {
        let auth_state = AuthState {
            jwt_manager: JwtManager::new(TEST_SECRET),
        };
        Router::new()
            .route("/me", get(whoami))
            .layer(axum::middleware::from_fn_with_state(auth_state, require_auth))
    }

    #[tokio::test]
    async fn test_missing_token_is_401() {
        let response = app()
            .oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_garbage_token_is_401() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header(AUTHORIZATION, "Bearer not.a.jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler() {
        let user = UserId::new();
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header(AUTHORIZATION, format!("Bearer {}", token_for(user)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, user.to_string());
    }
}
