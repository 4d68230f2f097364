//! MetaMind API Server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use metamind_api::{
    config::{Config, StoreBackend},
    create_router, llm,
    session::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore},
    AppState,
};
use metamind_billing::QuotaPolicy;
use metamind_shared::{create_pool, run_migrations, MemoryStore, PgStore, Stores};
use tokio::time::{interval, Duration};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,metamind_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting MetaMind API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let stores = match (config.store_backend, config.database_url.as_deref()) {
        (StoreBackend::Postgres, Some(database_url)) => {
            tracing::info!("Connecting to database...");
            let pool = create_pool(database_url, config.database_max_connections).await?;
            if config.run_migrations {
                run_migrations(&pool).await?;
                tracing::info!("Migrations applied");
            }
            tracing::info!("Database connection established");
            Stores::from_backend(Arc::new(PgStore::new(pool)))
        }
        (StoreBackend::Postgres, None) => anyhow::bail!("DATABASE_URL is required for the postgres store"),
        (StoreBackend::Memory, _) => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Stores::from_backend(Arc::new(MemoryStore::new()))
        }
    };

    let policy = QuotaPolicy::from_env()?;
    tracing::info!(
        grant = ?policy.grant,
        reset_count_on_upgrade = policy.reset_count_on_upgrade,
        revert_premium_when_exhausted = policy.revert_premium_when_exhausted,
        allowance_reset = ?policy.allowance_reset,
        "Quota policy loaded"
    );

    // Provider calls carry their own generation timeout; this only bounds a hung connection
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.generation_timeout_secs.saturating_add(5)))
        .build()?;
    let provider = llm::provider_from_config(&config, http_client);
    tracing::info!(provider = provider.name(), "LLM provider configured");

    let snapshots: Arc<dyn SnapshotStore> = match &config.session_snapshot_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir).await?;
            tracing::info!(dir = %dir.display(), "Persisting session snapshots");
            Arc::new(FileSnapshotStore::new(dir.clone()))
        }
        None => Arc::new(MemorySnapshotStore::new()),
    };

    let state = AppState::new(config.clone(), stores, policy, provider, snapshots);

    // Periodic session cache cleanup
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let removed = sessions.cleanup().await;
            if removed > 0 {
                let stats = sessions.stats().await;
                tracing::debug!(
                    removed,
                    active = stats.active_entries,
                    hits = stats.hits,
                    misses = stats.misses,
                    "Session cache cleanup"
                );
            }
        }
    });

    let allowed_origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    tracing::info!(
        allowed_origins = ?allowed_origins,
        "CORS configured with {} allowed origins",
        allowed_origins.len()
    );

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::ORIGIN,
        ])
        .expose_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
