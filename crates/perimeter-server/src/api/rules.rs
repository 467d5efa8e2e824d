//! Rule replacement endpoint.
//!
//! The rule sync collaborator owns persistence; it pushes the full rule set
//! here whenever it changes. Rules are validated before they reach the engine.

use axum::extract::State;
use axum::routing::put;
use axum::{Json, Router};
use perimeter_core::Rule;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the rules router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", put(replace_rules))
}

/// The complete rule set.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReplaceRulesRequest {
    /// Every rule. Rules not listed are removed.
    pub rules: Vec<Rule>,
}

/// Response after replacing the rule set.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReplaceRulesResponse {
    /// Whether the rules were accepted.
    pub success: bool,

    /// Number of rules now loaded.
    #[schema(example = 3)]
    pub rule_count: usize,
}

/// Replace all rules.
#[utoipa::path(
    put,
    path = "/api/rules",
    tag = "rules",
    operation_id = "replaceRules",
    summary = "Replace the rule set",
    description = "Validates and installs a complete rule set. If any rule is invalid \
        nothing is changed. Hysteresis state of removed rules is discarded.",
    request_body = ReplaceRulesRequest,
    responses(
        (status = 200, description = "Rules replaced", body = ReplaceRulesResponse),
        (status = 400, description = "A rule is invalid", body = super::error::ErrorResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn replace_rules(
    State(state): State<SharedState>,
    Json(request): Json<ReplaceRulesRequest>,
) -> ApiResult<Json<ReplaceRulesResponse>> {
    for rule in &request.rules {
        rule.validate()?;
    }

    let rule_count = request.rules.len();
    state.engine().replace_rules(request.rules).await?;
    info!(rule_count, "Rules replaced");

    Ok(Json(ReplaceRulesResponse {
        success: true,
        rule_count,
    }))
}
