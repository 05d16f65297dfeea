use std::sync::Arc;
use axum::{
    Router,
    routing::{get, post},
    extract::{Path, State, Json},
    http::{header, StatusCode},
    response::IntoResponse,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use crate::core::{Cycle, Orchestrator, PipelineStatus, ProviderStatus};
use crate::error::Error;
use crate::observability::metrics;
use crate::types::ids::CycleId;

pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Read-only surface over the published cycles plus a manual trigger.
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/providers", get(get_providers))
        .route("/cycles", get(list_cycles))
        .route("/cycles/latest", get(get_latest_cycle))
        .route("/cycles/trigger", post(trigger_cycle))
        .route("/cycles/:id", get(get_cycle))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Json<PipelineStatus> {
    Json(state.orchestrator.status().await)
}

async fn get_providers(State(state): State<Arc<ApiState>>) -> Json<Vec<ProviderStatus>> {
    Json(state.orchestrator.status().await.providers)
}

#[derive(Serialize)]
struct CycleList {
    cycles: Vec<CycleId>,
    latest: Option<CycleId>,
}

async fn list_cycles(State(state): State<Arc<ApiState>>) -> Json<CycleList> {
    let cycles = state.orchestrator.history_ids().await;
    let latest = cycles.last().copied();
    Json(CycleList { cycles, latest })
}

async fn get_latest_cycle(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Cycle>, StatusCode> {
    match state.orchestrator.get_latest_cycle().await {
        Ok(cycle) => Ok(Json(cycle.as_ref().clone())),
        Err(Error::NoPublishedCycle) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Latest cycle lookup failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_cycle(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> Result<Json<Cycle>, StatusCode> {
    match state.orchestrator.get_cycle(CycleId(id)).await {
        Ok(Some(cycle)) => Ok(Json(cycle.as_ref().clone())),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Loading cycle {} failed: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Serialize)]
struct TriggerResponse {
    accepted: bool,
    reason: Option<&'static str>,
}

async fn trigger_cycle(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<TriggerResponse>) {
    if state.orchestrator.is_running() {
        return (
            StatusCode::CONFLICT,
            Json(TriggerResponse { accepted: false, reason: Some("cycle in progress") }),
        );
    }

    state.orchestrator.request_run();
    tracing::info!("Manual cycle requested");
    (StatusCode::ACCEPTED, Json(TriggerResponse { accepted: true, reason: None }))
}

async fn get_metrics() -> impl IntoResponse {
    match metrics::gather() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ).into_response(),
        Err(e) => {
            tracing::error!("Metrics encoding failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
