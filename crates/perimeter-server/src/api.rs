//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `evaluation` - Latest and on-demand blocking decisions
//! - `beacons` - Beacon registration, sensor events and region snapshots
//! - `rules` - Rule replacement
//! - `location` - Location fixes
//! - `strategy` - Active rule processing strategy
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod beacons;
pub mod error;
pub mod evaluation;
pub mod health;
pub mod location;
pub mod openapi;
pub mod rules;
pub mod strategy;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /swagger-ui            - Interactive API documentation
/// /api
/// ├── /evaluation        - Latest result, evaluate now
/// ├── /blocked           - Blocked resource ids only
/// ├── /beacons           - Registration, status, events, region snapshots
/// ├── /rules             - Rule replacement
/// ├── /location          - Location fix
/// ├── /strategy          - Active strategy
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/blocked", get(evaluation::get_blocked))
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/evaluation", evaluation::router())
                .nest("/beacons", beacons::router())
                .nest("/rules", rules::router())
                .nest("/location", location::router())
                .nest("/strategy", strategy::router()),
        )
        .with_state(state)
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
