//! Strategy selection endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use perimeter_core::StrategyKind;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the strategy router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_strategy).put(update_strategy))
}

/// Active strategy.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"strategy": "default", "available": ["default", "region"]}))]
pub struct StrategyResponse {
    /// Strategy in use.
    pub strategy: StrategyKind,

    /// Strategies that can be selected.
    pub available: Vec<StrategyKind>,
}

/// Request to switch strategies.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({"strategy": "region"}))]
pub struct UpdateStrategyRequest {
    /// Strategy to activate.
    pub strategy: StrategyKind,
}

fn response(strategy: StrategyKind) -> StrategyResponse {
    StrategyResponse {
        strategy,
        available: vec![StrategyKind::Default, StrategyKind::Region],
    }
}

/// Get the active strategy.
#[utoipa::path(
    get,
    path = "/api/strategy",
    tag = "strategy",
    operation_id = "getStrategy",
    summary = "Get the active strategy",
    responses(
        (status = 200, description = "Active strategy", body = StrategyResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn get_strategy(State(state): State<SharedState>) -> ApiResult<Json<StrategyResponse>> {
    let snapshot = state.engine().snapshot().await?;
    Ok(Json(response(snapshot.strategy)))
}

/// Switch strategies.
#[utoipa::path(
    put,
    path = "/api/strategy",
    tag = "strategy",
    operation_id = "updateStrategy",
    summary = "Switch the active strategy",
    description = "Replaces the active strategy with a fresh instance. The new strategy \
        starts without hysteresis memory. Selecting the active strategy is a no-op.",
    request_body = UpdateStrategyRequest,
    responses(
        (status = 200, description = "Strategy switched", body = StrategyResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn update_strategy(
    State(state): State<SharedState>,
    Json(request): Json<UpdateStrategyRequest>,
) -> ApiResult<Json<StrategyResponse>> {
    let engine = state.engine();
    engine.switch_strategy(request.strategy).await?;
    let snapshot = engine.snapshot().await?;
    Ok(Json(response(snapshot.strategy)))
}
