//! Shared response types and OpenAPI schemas.
//!
//! Most API types live next to the code that produces them (registry, strategy,
//! engine). This module holds the few that belong to no single module.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::strategy::{RuleEvaluationResult, StrategyKind};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Whether the engine runtime is accepting commands.
    pub engine_running: bool,

    /// Strategy of the latest published result.
    pub strategy: StrategyKind,
}

/// Blocked resource identifiers only, for the enforcement layer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"evaluated_at": "2025-01-15T10:00:00Z", "blocked_resource_ids": ["com.example.social"]}))]
pub struct BlockedResources {
    /// When the decision was made.
    pub evaluated_at: chrono::DateTime<chrono::Utc>,

    /// Resources to block.
    pub blocked_resource_ids: Vec<String>,
}

impl From<&RuleEvaluationResult> for BlockedResources {
    fn from(result: &RuleEvaluationResult) -> Self {
        Self {
            evaluated_at: result.evaluated_at,
            blocked_resource_ids: result.blocked_resource_ids.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_blocked_resources_are_sorted() {
        let mut result = RuleEvaluationResult::empty(StrategyKind::Default, Utc::now());
        result.blocked_resource_ids.insert("com.example.video".into());
        result.blocked_resource_ids.insert("com.example.chat".into());

        let blocked = BlockedResources::from(&result);
        assert_eq!(blocked.evaluated_at, result.evaluated_at);
        assert_eq!(
            blocked.blocked_resource_ids,
            vec!["com.example.chat".to_string(), "com.example.video".to_string()]
        );
    }
}
