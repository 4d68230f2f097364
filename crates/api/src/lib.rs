#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! MetaMind API Library
//!
//! HTTP surface for the prompt generator: Supabase auth, the session cache,
//! LLM-backed generation and the Stripe payment routes.

pub mod auth;
pub mod config;
pub mod error;
pub mod generation;
pub mod llm;
pub mod routes;
pub mod session;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use generation::{GenerationError, GenerationService};
pub use routes::create_router;
pub use state::AppState;
