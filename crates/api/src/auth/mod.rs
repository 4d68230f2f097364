//! Authentication for Supabase-issued access tokens

pub mod jwt;
pub mod middleware;

pub use jwt::{JwtError, JwtManager, SupabaseClaims, SUPABASE_AUDIENCE};
pub use middleware::{require_auth, AuthState, AuthUser};
