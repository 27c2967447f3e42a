use anyfactor::{
    core::{config::ExtractorConfig, types::ExtractRequestBody},
    pipeline::progress::DEFAULT_CAPACITY,
    ExtractRequest, Orchestrator, ProgressSink, StreamEvent,
};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

const NDJSON: &str = "application/x-ndjson";

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn bad_request(error: impl ToString) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

struct AppState {
    orchestrator: Arc<Orchestrator>,
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

fn encode(event: &StreamEvent) -> String {
    event.to_ndjson().unwrap_or_else(|e| {
        log::error!("Failed to encode stream event: {}", e);
        format!("{}\n", json!({ "type": "error", "message": "failed to encode event" }))
    })
}

async fn extract(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExtractRequestBody>, JsonRejection>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let request_id = Uuid::new_v4();
    let Json(body) = payload.map_err(|e| {
        log::warn!("[{}] Rejected request body: {}", request_id, e.body_text());
        bad_request(e.body_text())
    })?;
    let request = ExtractRequest::try_from(body).map_err(|e| {
        log::warn!("[{}] {}", request_id, e);
        bad_request(match e {
            anyfactor::PipelineError::InvalidRequest(message) => message,
            other => other.to_string(),
        })
    })?;

    log::info!(
        "[{}] Extract {:?} for {:?} (limit {})",
        request_id,
        request.feature,
        request.tickers.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
        request.limit
    );

    let (sink, rx) = ProgressSink::channel(DEFAULT_CAPACITY, CancellationToken::new());
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        match orchestrator.run(&request, &sink).await {
            Ok(summary) => log::info!(
                "[{}] Completed with {} result(s), {} failure(s) in {:.1}s",
                request_id,
                summary.results.len(),
                summary.failures,
                summary.elapsed.as_secs_f64()
            ),
            Err(e) => log::warn!("[{}] Ended early: {}", request_id, e),
        }
    });

    // Dropping the body (client gone) drops the receiver, which cancels the run.
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(encode(&event)), rx))
    });

    Ok(([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(stream)).into_response())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/extract", post(extract))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = ExtractorConfig::from_env()?;
    let orchestrator = Orchestrator::from_config(&config)?;
    let state = Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    log::info!("Starting server on {}", config.bind_addr);
    axum::serve(listener, router(state)).await?;

    Ok(())
}
