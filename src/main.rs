mod auth;
mod backend;
mod config;
mod errors;
mod handlers;
mod history;
mod models;
mod pipeline;
mod registry;
mod report;
mod scheduler;
mod store;
mod summarizer;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::handlers::AppState;

/// Main entry point for the application.
///
/// Initializes logging, loads configuration and persisted state,
/// spawns the scheduler poll task, and starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nfp_monitor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration and persisted state
    let config = Config::from_env()?;
    let port = config.port;
    let state = AppState::initialize(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize state: {}", e))?;

    // Background scheduler: the only source of concurrent triggering
    let _scheduler = scheduler::spawn(state.clone());
    tracing::info!("Scheduler poll task started");

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("valid governor configuration"),
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        .route("/api/v1/auth/login", post(handlers::login))
        // Client registry
        .route(
            "/api/v1/clients",
            get(handlers::list_clients).post(handlers::create_client),
        )
        .route(
            "/api/v1/clients/:id",
            put(handlers::update_client).delete(handlers::delete_client),
        )
        // Certificates
        .route(
            "/api/v1/certificates",
            get(handlers::list_certificates).post(handlers::upload_certificate),
        )
        .route(
            "/api/v1/certificates/:id",
            delete(handlers::delete_certificate),
        )
        .route(
            "/api/v1/certificates/:id/validate",
            post(handlers::validate_certificate),
        )
        // Processing & results
        .route("/api/v1/process", post(handlers::process))
        .route("/api/v1/results", get(handlers::get_results))
        .route("/api/v1/results/export", get(handlers::export_results))
        .route(
            "/api/v1/results/alert-report",
            get(handlers::get_alert_report),
        )
        .route("/api/v1/history", get(handlers::get_history))
        // Scheduled jobs
        .route(
            "/api/v1/schedules",
            get(handlers::list_schedules).post(handlers::create_schedule),
        )
        .route("/api/v1/schedules/:id", delete(handlers::delete_schedule))
        // Backend configuration
        .route(
            "/api/v1/config",
            get(handlers::get_backend_config).put(handlers::update_backend_config),
        )
        .route("/api/v1/config/verify", post(handlers::verify_connection))
        // Theme preference
        .route(
            "/api/v1/theme",
            get(handlers::get_theme).put(handlers::set_theme),
        )
        .layer(
            ServiceBuilder::new()
                // Request size limit: 10MB max payload (base64 certificate uploads)
                .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Build final app with health check bypassing rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
