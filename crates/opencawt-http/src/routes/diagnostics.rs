//! Operator-facing health endpoint (spec §6): active case count, cases
//! stuck past their runtime deadline, and seal-queue depth. Gated by the
//! same static system API key used for other operator-only calls.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};

use opencawt_core::error::OpenCawtError;

use crate::dto::DiagnosticsView;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/diagnostics", get(diagnostics))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn diagnostics(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<DiagnosticsView>> {
    match bearer_token(&headers) {
        Some(token) if token == state.config.system_api_key => {}
        _ => return Err(ApiError::from(OpenCawtError::MissingAuthHeaders)),
    }

    let now = state.clock.now();
    let active = state.store.iter_active_cases()?;
    let mut stuck_cases = Vec::new();
    for case in &active {
        if let Some(runtime) = state.store.get_case_runtime(&case.case_id)? {
            if runtime.stage_deadline_at.is_some_and(|deadline| now > deadline + 300) {
                stuck_cases.push(case.case_id.clone());
            }
        }
    }
    let seal_queue_depth = state.store.iter_retryable_seal_jobs()?.len();

    Ok(Json(DiagnosticsView {
        active_cases: active.len(),
        stuck_cases,
        seal_queue_depth,
    }))
}
