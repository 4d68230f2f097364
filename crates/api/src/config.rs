//! Application configuration

use std::env;
use std::path::PathBuf;

/// Where profile, history and payment rows live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// In-process store for local development; nothing survives a restart
    Memory,
}

/// Which LLM answers generation requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    OpenAi,
    Gemini,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub allowed_origins: Vec<String>,

    // Storage
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub run_migrations: bool,

    // Authentication
    pub supabase_jwt_secret: String,

    // Billing
    pub enable_billing: bool,

    // LLM
    pub llm_provider: LlmProviderKind,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub generation_timeout_secs: u64,

    // Session cache
    pub session_ttl_secs: u64,
    pub session_snapshot_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_backend = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            _ => {
                return Err(ConfigError::Invalid(
                    "STORE_BACKEND must be 'postgres' or 'memory'",
                ))
            }
        };

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let llm_provider = match env::var("LLM_PROVIDER")
            .unwrap_or_else(|_| "openai".to_string())
            .to_lowercase()
            .as_str()
        {
            "openai" => LlmProviderKind::OpenAi,
            "gemini" => LlmProviderKind::Gemini,
            _ => {
                return Err(ConfigError::Invalid(
                    "LLM_PROVIDER must be 'openai' or 'gemini'",
                ))
            }
        };

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            // Storage
            store_backend,
            database_url,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            run_migrations: env::var("RUN_MIGRATIONS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),

            // Authentication
            supabase_jwt_secret: {
                let secret = env::var("SUPABASE_JWT_SECRET")
                    .map_err(|_| ConfigError::Missing("SUPABASE_JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "SUPABASE_JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },

            // Billing
            enable_billing: env::var("ENABLE_BILLING")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),

            // LLM
            llm_provider,
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            generation_timeout_secs: env::var("GENERATION_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .unwrap_or(15),

            // Session cache
            session_ttl_secs: env::var("SESSION_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            session_snapshot_dir: env::var("SESSION_SNAPSHOT_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SECRET: &str = "test-supabase-secret-at-least-32-characters";

    fn cleanup_config() {
        for key in [
            "STORE_BACKEND",
            "DATABASE_URL",
            "SUPABASE_JWT_SECRET",
            "LLM_PROVIDER",
            "GENERATION_TIMEOUT_SECS",
            "SESSION_SNAPSHOT_DIR",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial(config_env)]
    fn test_postgres_backend_requires_database_url() {
        cleanup_config();
        env::set_var("SUPABASE_JWT_SECRET", SECRET);

        match Config::from_env() {
            Err(ConfigError::Missing("DATABASE_URL")) => {}
            other => panic!("Expected Missing(DATABASE_URL), got: {:?}", other),
        }

        env::set_var("DATABASE_URL", "postgres://test");
        let config = Config::from_env().unwrap();
        assert_eq!(config.store_backend, StoreBackend::Postgres);
        assert_eq!(config.database_url.as_deref(), Some("postgres://test"));

        cleanup_config();
    }

    #[test]
    #[serial(config_env)]
    fn test_memory_backend_and_defaults() {
        cleanup_config();
        env::set_var("STORE_BACKEND", "memory");
        env::set_var("SUPABASE_JWT_SECRET", SECRET);

        let config = Config::from_env().unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.llm_provider, LlmProviderKind::OpenAi);
        assert_eq!(config.openai_model, "gpt-4o-mini");
        assert_eq!(config.gemini_model, "gemini-2.0-flash");
        assert_eq!(config.generation_timeout_secs, 15);
        assert_eq!(config.session_ttl_secs, 300);
        assert!(config.session_snapshot_dir.is_none());

        cleanup_config();
    }

    #[test]
    #[serial(config_env)]
    fn test_weak_jwt_secret_rejected() {
        cleanup_config();
        env::set_var("STORE_BACKEND", "memory");
        env::set_var("SUPABASE_JWT_SECRET", "short");

        assert!(matches!(Config::from_env(), Err(ConfigError::WeakSecret(_))));

        env::remove_var("SUPABASE_JWT_SECRET");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("SUPABASE_JWT_SECRET"))
        ));

        cleanup_config();
    }

    #[test]
    #[serial(config_env)]
    fn test_unknown_provider_rejected() {
        cleanup_config();
        env::set_var("STORE_BACKEND", "memory");
        env::set_var("SUPABASE_JWT_SECRET", SECRET);
        env::set_var("LLM_PROVIDER", "claude");

        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));

        env::set_var("LLM_PROVIDER", "Gemini");
        assert_eq!(Config::from_env().unwrap().llm_provider, LlmProviderKind::Gemini);

        cleanup_config();
    }
}
