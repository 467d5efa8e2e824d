//! Blocking decision endpoints.
//!
//! The engine publishes a result after every periodic tick and, debounced,
//! after any input change. These endpoints read the latest published result
//! or force a fresh evaluation.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use perimeter_core::{BlockedResources, RuleEvaluationResult};

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the evaluation router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_evaluation).post(evaluate_now))
}

/// Get the latest evaluation result.
#[utoipa::path(
    get,
    path = "/api/evaluation",
    tag = "evaluation",
    operation_id = "getEvaluation",
    summary = "Get the latest blocking decision",
    description = "Returns the most recently published evaluation, including per-rule \
        decisions, diagnostics and the union of blocked resource ids. Does not \
        trigger a new evaluation.",
    responses(
        (status = 200, description = "Latest result", body = RuleEvaluationResult)
    )
)]
pub async fn get_evaluation(State(state): State<SharedState>) -> Json<RuleEvaluationResult> {
    Json(RuleEvaluationResult::clone(&state.engine().latest()))
}

/// Evaluate every rule now.
#[utoipa::path(
    post,
    path = "/api/evaluation",
    tag = "evaluation",
    operation_id = "evaluateNow",
    summary = "Evaluate rules immediately",
    description = "Applies every queued sensor event and input change, evaluates all \
        rules and returns the new result. The result is also published to \
        subscribers.",
    responses(
        (status = 200, description = "Fresh result", body = RuleEvaluationResult),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn evaluate_now(
    State(state): State<SharedState>,
) -> ApiResult<Json<RuleEvaluationResult>> {
    let result = state.engine().evaluate_now().await?;
    Ok(Json(RuleEvaluationResult::clone(&result)))
}

/// Get only the blocked resource ids.
#[utoipa::path(
    get,
    path = "/api/blocked",
    tag = "evaluation",
    operation_id = "getBlocked",
    summary = "Get blocked resource ids",
    description = "Returns the sorted blocked resource ids of the latest result. This is \
        the only view the enforcement layer needs.",
    responses(
        (status = 200, description = "Blocked resources", body = BlockedResources)
    )
)]
pub async fn get_blocked(State(state): State<SharedState>) -> Json<BlockedResources> {
    Json(BlockedResources::from(state.engine().latest().as_ref()))
}
