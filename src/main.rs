use axum::http::{header, HeaderName, HeaderValue, Method};
use smartqueue::api::{self, middleware::SPOTIFY_TOKEN_HEADER, AppState};
use smartqueue::config::Config;
use smartqueue::services::{AuthService, EngineConfig, QueueEngine, SpotifyClient};
use smartqueue::store::{PgStore, RedisQueueCache};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,smartqueue=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Connect to database
    let db = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await?;
    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("Database migrations completed");

    // Connect to Redis
    let redis_client = redis::Client::open(config.redis_url.as_str())?;
    let redis = redis::aio::ConnectionManager::new(redis_client).await?;
    tracing::info!("Connected to Redis");

    // Initialize services
    let store = Arc::new(PgStore::new(db.clone()));
    let engine = Arc::new(QueueEngine::new(
        Arc::new(SpotifyClient::new(config.spotify_api_base.clone())),
        store.clone(),
        store,
        Arc::new(RedisQueueCache::new(redis)),
        EngineConfig {
            tier_debounce: config.tier_debounce,
            near_end_ms: config.near_end_ms,
        },
    ));

    let app_state = Arc::new(AppState {
        engine: engine.clone(),
        auth_service: Arc::new(AuthService::new(&config)),
    });

    let app = api::api_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins(&config.cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static("x-spotify-token"),
                ]),
        );

    // Start server
    let addr = format!("{}:{}", config.server_host, config.server_port);
    tracing::info!("Starting server on {} ({} forwarded)", addr, SPOTIFY_TOKEN_HEADER);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Pending tier deltas would otherwise be lost with their timers
    let flushed = engine.flush_tiers().await;
    tracing::info!("Flushed {} pending tier updates", flushed.len());

    Ok(())
}

fn allowed_origins(origins: &[String]) -> AllowOrigin {
    if origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS allows any origin");
        return Any.into();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    AllowOrigin::list(origins)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {:?}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
