use crate::auth::{self, Session};
use crate::backend::{self, HttpBackend, NfpBackend};
use crate::config::Config;
use crate::errors::AppError;
use crate::history::HistoryLog;
use crate::models::{BackendConfig, Certificate, Client, HistoryItem, ScheduledJob};
use crate::pipeline::{self, RunSnapshot};
use crate::registry::{CertificateUpload, ClientInput, Registry};
use crate::report;
use crate::scheduler::JobQueue;
use crate::store::{keys, Store};
use crate::summarizer::Summarizer;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Allowed deployment regions for the backend functions.
const REGIONS: &[&str] = &["southamerica-east1", "us-central1", "us-east1"];

/// Shared application state injected into handlers and background
/// tasks. Every collection is owned here; there are no ambient
/// singletons.
pub struct AppState {
    /// Process configuration (immutable after startup).
    pub config: Config,
    /// Durable key-indexed store backing all collections.
    pub store: Store,
    /// Shared HTTP client with the bounded query deadline.
    pub http: reqwest::Client,
    /// Clients and certificates.
    pub registry: Mutex<Registry>,
    /// Runtime-mutable backend settings.
    pub backend_config: Mutex<BackendConfig>,
    /// Bounded log of past processing runs.
    pub history: HistoryLog,
    /// Scheduled jobs and their in-flight claims.
    pub jobs: Mutex<JobQueue>,
    /// AI risk-summary collaborator.
    pub summarizer: Summarizer,
    /// Authenticated session, if any.
    pub session: Mutex<Option<Session>>,
    /// Snapshot of the most recent processing run.
    pub last_run: Mutex<Option<RunSnapshot>>,
    /// UI theme preference.
    pub theme: Mutex<String>,
}

impl AppState {
    /// Loads every persisted collection and assembles the shared
    /// state. Collections with corrupt files come up empty without
    /// affecting the others.
    pub async fn initialize(config: Config) -> Result<Arc<Self>, AppError> {
        let store = Store::open(&config.data_dir).await?;
        let http = HttpBackend::build_client(config.query_timeout_secs)?;

        let registry = Registry::load(&store).await;
        let backend_config: BackendConfig = store.load(keys::BACKEND_CONFIG).await;
        let history = HistoryLog::load(&store).await;
        let jobs = JobQueue::load(&store).await;
        let session: Option<Session> = store.load(keys::SESSION).await;
        let theme: Option<String> = store.load(keys::THEME).await;

        let summarizer = Summarizer::new(
            http.clone(),
            config.summarizer_base_url.clone(),
            config.summarizer_api_key.clone(),
        );

        tracing::info!(
            "State loaded: {} client(s), {} certificate(s), {} scheduled job(s)",
            registry.clients.len(),
            registry.certificates.len(),
            jobs.jobs().len()
        );

        Ok(Arc::new(Self {
            config,
            store,
            http,
            registry: Mutex::new(registry),
            backend_config: Mutex::new(backend_config),
            history,
            jobs: Mutex::new(jobs),
            summarizer,
            session: Mutex::new(session),
            last_run: Mutex::new(None),
            theme: Mutex::new(theme.unwrap_or_else(|| "light".to_string())),
        }))
    }
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "nfp-monitor",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

// ============ Auth ============

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Session>, AppError> {
    let session = auth::login(&state.config, &req.email, &req.password)?;
    state.store.save(keys::SESSION, &Some(session.clone())).await;
    *state.session.lock().await = Some(session.clone());
    tracing::info!("Login succeeded for {}", session.email);
    Ok(Json(session))
}

// ============ Clients ============

/// GET /api/v1/clients
pub async fn list_clients(State(state): State<Arc<AppState>>) -> Json<Vec<Client>> {
    Json(state.registry.lock().await.clients.clone())
}

/// POST /api/v1/clients
pub async fn create_client(
    State(state): State<Arc<AppState>>,
    Json(input): Json<ClientInput>,
) -> Result<(StatusCode, Json<Client>), AppError> {
    let mut registry = state.registry.lock().await;
    let client = registry.add_client(input)?.clone();
    registry.persist_clients(&state.store).await;
    tracing::info!("Client '{}' created (id {})", client.name, client.id);
    Ok((StatusCode::CREATED, Json(client)))
}

/// PUT /api/v1/clients/:id
pub async fn update_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(input): Json<ClientInput>,
) -> Result<Json<Client>, AppError> {
    let mut registry = state.registry.lock().await;
    let client = registry.update_client(id, input)?.clone();
    registry.persist_clients(&state.store).await;
    Ok(Json(client))
}

/// DELETE /api/v1/clients/:id
pub async fn delete_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let mut registry = state.registry.lock().await;
    registry.remove_client(id)?;
    registry.persist_clients(&state.store).await;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Certificates ============

/// GET /api/v1/certificates
pub async fn list_certificates(State(state): State<Arc<AppState>>) -> Json<Vec<Certificate>> {
    Json(state.registry.lock().await.certificates.clone())
}

/// POST /api/v1/certificates
pub async fn upload_certificate(
    State(state): State<Arc<AppState>>,
    Json(upload): Json<CertificateUpload>,
) -> Result<(StatusCode, Json<Certificate>), AppError> {
    let mut registry = state.registry.lock().await;
    let cert = registry.add_certificate(upload)?.clone();
    registry.persist_certificates(&state.store).await;
    tracing::info!("Certificate '{}' uploaded (id {})", cert.name, cert.id);
    Ok((StatusCode::CREATED, Json(cert)))
}

/// DELETE /api/v1/certificates/:id
pub async fn delete_certificate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let mut registry = state.registry.lock().await;
    registry.remove_certificate(id)?;
    registry.persist_certificates(&state.store).await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/certificates/:id/validate
///
/// Sends the certificate to the validation backend and applies the
/// outcome. The registry alone mutates certificate state; the backend
/// only reports.
pub async fn validate_certificate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Certificate>, AppError> {
    let (payload, password) = {
        let registry = state.registry.lock().await;
        let cert = registry
            .certificate(id)
            .ok_or_else(|| AppError::NotFound(format!("Certificate {} not found", id)))?;
        (cert.payload_base64.clone(), cert.password.clone())
    };

    let config = state.backend_config.lock().await.clone();
    let backend = backend::select(&config, &state.http);
    let outcome = backend.validate_certificate(&payload, &password).await;

    let mut registry = state.registry.lock().await;
    let cert = registry.apply_validation(id, outcome)?.clone();
    registry.persist_certificates(&state.store).await;
    tracing::info!("Certificate {} validation finished: {:?}", id, cert.status);
    Ok(Json(cert))
}

// ============ Processing & results ============

/// POST /api/v1/process
pub async fn process(State(state): State<Arc<AppState>>) -> Result<Json<RunSnapshot>, AppError> {
    pipeline::run(&state).await?;
    let snapshot = state
        .last_run
        .lock()
        .await
        .clone()
        .ok_or_else(|| AppError::Internal("Run finished without a snapshot".to_string()))?;
    Ok(Json(snapshot))
}

/// GET /api/v1/results
pub async fn get_results(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RunSnapshot>, AppError> {
    state
        .last_run
        .lock()
        .await
        .clone()
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No processing run yet".to_string()))
}

/// GET /api/v1/results/export — CSV of the last run.
pub async fn export_results(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state
        .last_run
        .lock()
        .await
        .clone()
        .ok_or_else(|| AppError::NotFound("No processing run yet".to_string()))?;
    if snapshot.results.is_empty() {
        return Err(AppError::Validation("No results to export".to_string()));
    }
    let csv = report::export_csv(&snapshot.results);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        csv,
    ))
}

/// GET /api/v1/results/alert-report — markdown over flagged clients.
pub async fn get_alert_report(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let snapshot = state
        .last_run
        .lock()
        .await
        .clone()
        .ok_or_else(|| AppError::NotFound("No processing run yet".to_string()))?;
    let content = report::alert_report(&snapshot.results)
        .ok_or_else(|| AppError::NotFound("No clients with alerts in the last run".to_string()))?;
    Ok(Json(json!({ "content": content })))
}

/// GET /api/v1/history
pub async fn get_history(State(state): State<Arc<AppState>>) -> Json<Vec<HistoryItem>> {
    Json(state.history.items().await)
}

// ============ Scheduled jobs ============

#[derive(Debug, Deserialize)]
pub struct ScheduleInput {
    pub client_id: i64,
    /// Competence period, `MM/YYYY`.
    pub period: String,
    pub due_at: DateTime<Utc>,
}

/// GET /api/v1/schedules
pub async fn list_schedules(State(state): State<Arc<AppState>>) -> Json<Vec<ScheduledJob>> {
    Json(state.jobs.lock().await.jobs().to_vec())
}

/// POST /api/v1/schedules
pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Json(input): Json<ScheduleInput>,
) -> Result<(StatusCode, Json<ScheduledJob>), AppError> {
    {
        let registry = state.registry.lock().await;
        if registry.client(input.client_id).is_none() {
            return Err(AppError::NotFound(format!(
                "Client {} not found",
                input.client_id
            )));
        }
    }

    let mut queue = state.jobs.lock().await;
    let job = queue.add(input.client_id, input.period, input.due_at)?.clone();
    state.store.save(keys::SCHEDULES, queue.jobs()).await;
    tracing::info!(
        "Job {} scheduled for client {} at {}",
        job.id,
        job.client_id,
        job.due_at
    );
    Ok((StatusCode::CREATED, Json(job)))
}

/// DELETE /api/v1/schedules/:id
pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let mut queue = state.jobs.lock().await;
    queue.remove(id)?;
    state.store.save(keys::SCHEDULES, queue.jobs()).await;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Backend configuration ============

#[derive(Debug, Deserialize)]
pub struct BackendConfigInput {
    pub project_id: String,
    pub region: String,
    pub use_mock: bool,
}

/// GET /api/v1/config
pub async fn get_backend_config(State(state): State<Arc<AppState>>) -> Json<BackendConfig> {
    Json(state.backend_config.lock().await.clone())
}

/// PUT /api/v1/config
///
/// Applies project/region/mock settings and derives the function
/// endpoints. Derived URLs are checked before they are stored; the
/// previous connection verification is always invalidated.
pub async fn update_backend_config(
    State(state): State<Arc<AppState>>,
    Json(input): Json<BackendConfigInput>,
) -> Result<Json<BackendConfig>, AppError> {
    if !REGIONS.contains(&input.region.as_str()) {
        return Err(AppError::Validation(format!(
            "Unknown region '{}', expected one of {:?}",
            input.region, REGIONS
        )));
    }
    if !input.use_mock && input.project_id.trim().is_empty() {
        return Err(AppError::Validation(
            "A project id is required for a real backend".to_string(),
        ));
    }

    let mut config = state.backend_config.lock().await;
    let mut updated = config.clone();
    updated.project_id = input.project_id;
    updated.region = input.region;
    updated.use_mock = input.use_mock;
    if !updated.project_id.trim().is_empty() {
        updated.derive_endpoints();
        // Reject project ids that do not form a valid URL.
        if let Some(endpoint) = &updated.endpoints.query_documents {
            url::Url::parse(endpoint).map_err(|e| {
                AppError::Validation(format!("Derived endpoint '{}' is invalid: {}", endpoint, e))
            })?;
        }
    }
    *config = updated;
    state.store.save(keys::BACKEND_CONFIG, &*config).await;
    Ok(Json(config.clone()))
}

/// POST /api/v1/config/verify
///
/// Health-checks the deployed backend with the session token and
/// marks the configuration as connection-verified on success.
pub async fn verify_connection(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BackendConfig>, AppError> {
    let endpoints = {
        let config = state.backend_config.lock().await;
        if !config.configured {
            return Err(AppError::Configuration(
                "Derive endpoints before verifying the connection".to_string(),
            ));
        }
        config.endpoints.clone()
    };

    let token = state
        .session
        .lock()
        .await
        .as_ref()
        .map(|s| s.token.clone())
        .unwrap_or_default();

    let backend = HttpBackend::new(state.http.clone(), endpoints);
    backend.health_check(&token).await?;

    let mut config = state.backend_config.lock().await;
    config.connection_verified = true;
    state.store.save(keys::BACKEND_CONFIG, &*config).await;
    tracing::info!("Backend connection verified");
    Ok(Json(config.clone()))
}

// ============ Theme ============

#[derive(Debug, Deserialize)]
pub struct ThemeInput {
    pub theme: String,
}

/// GET /api/v1/theme
pub async fn get_theme(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "theme": state.theme.lock().await.clone() }))
}

/// PUT /api/v1/theme
pub async fn set_theme(
    State(state): State<Arc<AppState>>,
    Json(input): Json<ThemeInput>,
) -> Result<Json<serde_json::Value>, AppError> {
    if input.theme != "light" && input.theme != "dark" {
        return Err(AppError::Validation(
            "Theme must be 'light' or 'dark'".to_string(),
        ));
    }
    *state.theme.lock().await = input.theme.clone();
    state.store.save(keys::THEME, &Some(input.theme.clone())).await;
    Ok(Json(json!({ "theme": input.theme })))
}
