//! Sequential NFP processing over the registered clients.
//!
//! Queries are issued one client at a time, never in parallel. That
//! bounds the load on the remote backend and keeps the log order
//! deterministic. A failing client is logged and skipped; only the two
//! guard conditions (no eligible clients, unverified real backend)
//! fail the run as a whole.

use crate::backend;
use crate::errors::AppError;
use crate::handlers::AppState;
use crate::history;
use crate::models::{
    current_period, Certificate, Client, ComparisonItem, HistoryItem, QueryResult, ResultSource,
};

/// Outcome of the most recent run, kept for the results/export/report
/// endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSnapshot {
    pub period: String,
    pub results: Vec<QueryResult>,
    pub comparison: Vec<ComparisonItem>,
    pub summary: Option<String>,
}

/// Runs the full pipeline for every eligible client in the current
/// period. Returns the accumulated results; individual client
/// failures never abort the batch.
pub async fn run(state: &AppState) -> Result<Vec<QueryResult>, AppError> {
    let period = current_period();

    // Snapshot targets and their certificates under one registry lock
    // so a concurrent edit cannot produce a torn view mid-run.
    let targets: Vec<(Client, Certificate)> = {
        let registry = state.registry.lock().await;
        registry
            .eligible_clients()
            .into_iter()
            .filter_map(|client| {
                let cert = registry.valid_certificate_for(&client).ok()?.clone();
                Some((client, cert))
            })
            .collect()
    };

    if targets.is_empty() {
        return Err(AppError::Validation(
            "No eligible clients: need active clients with all fields and a validated certificate"
                .to_string(),
        ));
    }

    let config = state.backend_config.lock().await.clone();
    let backend = backend::select(&config, &state.http);

    // Real runs require a configured and verified backend before any
    // query is issued.
    if backend.source() == ResultSource::Real && !config.ready_for_real() {
        return Err(AppError::Configuration(
            "Backend is configured but the connection has not been verified".to_string(),
        ));
    }

    tracing::info!(
        "Processing {} client(s) for {} via {:?} backend",
        targets.len(),
        period,
        backend.source()
    );

    let mut results: Vec<QueryResult> = Vec::new();
    for (client, certificate) in &targets {
        match backend.query_documents(client, &period, certificate).await {
            Ok(result) => {
                tracing::info!(
                    "✓ {}: {} issued | {} received",
                    client.name,
                    result.issued.document_count,
                    result.received.document_count
                );
                if let Some(missing) = result.issued.missing_recipient_count {
                    if missing > 0 {
                        tracing::warn!(
                            "⚠ {}: {} issued document(s) without recipient tax id",
                            client.name,
                            missing
                        );
                    }
                }
                results.push(result);
            }
            Err(e) => {
                tracing::error!("✗ Failed to process {}: {}", client.name, e);
            }
        }
    }

    // The previous run is captured before this one is recorded; the
    // comparison always reads the run immediately preceding ours.
    let previous = state.history.latest().await;
    state
        .history
        .record(&state.store, HistoryItem::from_results(results.clone()))
        .await;

    let comparison = history::compare(&results, previous.as_ref());

    let summary = if results.is_empty() {
        None
    } else {
        match state.summarizer.summarize(&results, &period).await {
            Ok(text) => {
                tracing::info!("AI summary generated ({} chars)", text.len());
                Some(text)
            }
            Err(e) => {
                // Summarization is best-effort; the run's outcome is
                // decided by the results alone.
                tracing::warn!("AI summary unavailable: {}", e);
                None
            }
        }
    };

    let snapshot = RunSnapshot {
        period,
        results: results.clone(),
        comparison,
        summary,
    };
    *state.last_run.lock().await = Some(snapshot);

    Ok(results)
}

/// Executes a single-client query for a scheduled job and records a
/// one-element history entry on success.
pub async fn run_single(
    state: &AppState,
    client_id: i64,
    period: &str,
) -> Result<QueryResult, AppError> {
    let (client, certificate) = {
        let registry = state.registry.lock().await;
        let client = registry
            .client(client_id)
            .ok_or_else(|| AppError::NotFound(format!("Client {} not found", client_id)))?
            .clone();
        let certificate = registry.valid_certificate_for(&client)?.clone();
        (client, certificate)
    };

    let config = state.backend_config.lock().await.clone();
    let backend = backend::select(&config, &state.http);
    if backend.source() == ResultSource::Real && !config.ready_for_real() {
        return Err(AppError::Configuration(
            "Backend is configured but the connection has not been verified".to_string(),
        ));
    }

    let result = backend.query_documents(&client, period, &certificate).await?;
    tracing::info!(
        "✓ Scheduled query for {}: {} issued | {} received",
        client.name,
        result.issued.document_count,
        result.received.document_count
    );

    state
        .history
        .record(&state.store, HistoryItem::from_results(vec![result.clone()]))
        .await;

    Ok(result)
}
