//! HTTP API: thin JSON wrappers over the lifecycle hooks.
//!
//! Every mutating route writes the store and invokes exactly one lifecycle
//! hook; nothing here touches the supervisor's internals beyond the status
//! snapshot. Authentication is intentionally absent — the panel is expected
//! to sit behind a reverse proxy.

use crate::hooks::LifecycleHooks;
use crate::store::RuleStore;
use crate::supervisor::Supervisor;
use aurora_core::{AuroraError, ForwardRule, RuleDraft, RulePatch};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub hooks: Arc<LifecycleHooks>,
    pub store: Arc<dyn RuleStore>,
    pub supervisor: Arc<Supervisor>,
}

/// Build the panel's router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/rules", get(list_rules).post(create_rule))
        .route("/api/rules/:id", patch(update_rule).delete(delete_rule))
        .route("/api/status", get(status))
        .route("/api/settings/restart", post(restart))
        .with_state(state)
}

/// `AuroraError` carried across a handler boundary, mapped to a status code.
struct ApiError(AuroraError);

impl From<AuroraError> for ApiError {
    fn from(e: AuroraError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AuroraError::RuleNotFound(_) => StatusCode::NOT_FOUND,
            AuroraError::PortConflict(_) => StatusCode::CONFLICT,
            AuroraError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

async fn list_rules(State(state): State<ApiState>) -> Result<Json<Vec<ForwardRule>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

async fn create_rule(
    State(state): State<ApiState>,
    Json(draft): Json<RuleDraft>,
) -> Result<(StatusCode, Json<ForwardRule>), ApiError> {
    let rule = state.hooks.create_rule(draft).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn update_rule(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<RulePatch>,
) -> Result<Json<ForwardRule>, ApiError> {
    Ok(Json(state.hooks.update_rule(id, body).await?))
}

async fn delete_rule(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.hooks.delete_rule(id).await? {
        Ok(Json(json!({ "status": "deleted" })))
    } else {
        Err(ApiError(AuroraError::RuleNotFound(id)))
    }
}

#[derive(Serialize)]
struct ProcessStatus {
    rule_id: i64,
    pid: Option<u32>,
    spec: String,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct StatusResponse {
    total: usize,
    running: Vec<i64>,
    /// Rules past their `expire_date`; informational only, never enforced.
    expired: Vec<i64>,
    processes: Vec<ProcessStatus>,
}

async fn status(State(state): State<ApiState>) -> Result<Json<StatusResponse>, ApiError> {
    let rules = state.store.list().await?;
    let processes: Vec<ProcessStatus> = state
        .supervisor
        .running()
        .await
        .into_iter()
        .map(|p| ProcessStatus {
            rule_id: p.rule_id,
            pid: p.pid,
            spec: p.spec,
            uptime_secs: p.uptime_secs,
        })
        .collect();

    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let expired = rules
        .iter()
        .filter(|r| r.is_expired(&today))
        .map(|r| r.id)
        .collect();

    Ok(Json(StatusResponse {
        total: rules.len(),
        running: processes.iter().map(|p| p.rule_id).collect(),
        expired,
        processes,
    }))
}

async fn restart(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, ApiError> {
    let failed = state.hooks.restart_all().await?;
    let failed_ids: Vec<i64> = failed.iter().map(|(id, _)| *id).collect();
    Ok(Json(json!({ "status": "restarted", "failed": failed_ids })))
}
