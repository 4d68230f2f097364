//! API routes

pub mod billing;
pub mod health;
pub mod profile;
pub mod prompts;


use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

use crate::{auth::require_auth, state::AppState};

/// Request bodies are small JSON documents; generation ideas are capped well below this
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Stripe authenticates itself with the signature header
    let public_api_routes = Router::new().route("/billing/webhook", post(billing::webhook));

    let protected_api_routes = Router::new()
        // Billing
        .route("/billing/payment-intent", post(billing::create_payment_intent))
        .route("/billing/payment-success", post(billing::payment_success))
        .route("/billing/payments", get(billing::list_payments))
        // Profile and session
        .route("/profile", get(profile::get_profile).patch(profile::update_profile))
        .route("/profile/refresh", post(profile::refresh_profile))
        .route("/session/invalidate", post(profile::invalidate_session))
        // Prompts
        .route("/prompts/generate", post(prompts::generate))
        .route("/prompts/history", get(prompts::history))
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    let api_v1_routes = Router::new()
        .merge(public_api_routes)
        .merge(protected_api_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .with_state(state)
}
