//! Supabase JWT validation

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use metamind_shared::UserId;
use serde::{Deserialize, Serialize};

/// Audience Supabase puts on signed-in user tokens
pub const SUPABASE_AUDIENCE: &str = "authenticated";

/// Clock skew tolerance in seconds
const LEEWAY_SECS: u64 = 60;

/// JWT claims structure for Supabase-issued tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseClaims {
    /// Subject (user ID as string, parsed to UUID on use)
    pub sub: String,
    pub email: Option<String>,
    /// Role (authenticated, anon, etc.)
    pub role: Option<String>,
    pub aud: Option<String>,
    pub iat: Option<i64>,
    pub exp: i64,
}

impl SupabaseClaims {
    pub fn user_id(&self) -> Result<UserId, JwtError> {
        self.sub
            .parse()
            .map_err(|_| JwtError::Validation(format!("subject is not a UUID: {}", self.sub)))
    }
}

/// Validates tokens signed with the project's JWT secret
#[derive(Clone)]
pub struct JwtManager {
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(supabase_secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(supabase_secret.as_bytes()),
        }
    }

    /// Validate a Supabase access token.
    /// HS256 only; audience must be `authenticated`.
    pub fn validate_supabase_token(&self, token: &str) -> Result<SupabaseClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        validation.set_audience(&[SUPABASE_AUDIENCE]);

        decode::<SupabaseClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidToken
                | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm
                | jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::Invalid,
                jsonwebtoken::errors::ErrorKind::InvalidAudience => {
                    tracing::warn!("Supabase JWT audience validation failed - rejecting token");
                    JwtError::Invalid
                }
                _ => JwtError::Validation(e.to_string()),
            })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Token validation failed: {0}")]
    Validation(String),
}


#[cfg(test)]
mod tests {
    use super::test_tokens::*;
    use super::*;

    #[test]
    fn test_valid_token() {
        let jwt = JwtManager::new(TEST_SECRET);
        let user = UserId::new();
        let claims = jwt.validate_supabase_token(&token_for(user)).unwrap();
        assert_eq!(claims.user_id().unwrap(), user);
        assert_eq!(claims.email.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let jwt = JwtManager::new(TEST_SECRET);
        let token = sign(
            &claims_for(UserId::new(), None),
            "another-secret-that-is-also-32-characters",
        );
        assert!(matches!(jwt.validate_supabase_token(&token), Err(JwtError::Invalid)));
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let jwt = JwtManager::new(TEST_SECRET);
        let mut claims = claims_for(UserId::new(), None);
        claims.aud = Some("anon".to_string());
        let token = sign(&claims, TEST_SECRET);
        assert!(matches!(jwt.validate_supabase_token(&token), Err(JwtError::Invalid)));
    }

    #[test]
    fn test_expired_token_rejected_after_leeway() {
        let jwt = JwtManager::new(TEST_SECRET);
        let mut claims = claims_for(UserId::new(), None);
        claims.exp -= 3600 + 120;
        let token = sign(&claims, TEST_SECRET);
        assert!(matches!(jwt.validate_supabase_token(&token), Err(JwtError::Expired)));
    }

    #[test]
    fn test_non_uuid_subject() {
        let claims = SupabaseClaims {
            sub: "not-a-uuid".to_string(),
            email: None,
            role: None,
            aud: None,
            iat: None,
            exp: 0,
        };
        assert!(claims.user_id().is_err());
    }
}
