//! Location fix endpoint.

use axum::extract::State;
use axum::routing::put;
use axum::{Json, Router};
use perimeter_core::Location;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the location router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", put(update_location))
}

/// Request to set or clear the location fix.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({"location": {"latitude": 52.3702, "longitude": 4.8952}}))]
pub struct UpdateLocationRequest {
    /// Latest fix, or `null` when no fix is available.
    #[serde(default)]
    pub location: Option<Location>,
}

/// Response after updating the location fix.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateLocationResponse {
    /// Whether the update was queued.
    pub success: bool,

    /// Fix now in use.
    pub location: Option<Location>,
}

/// Set or clear the location fix.
#[utoipa::path(
    put,
    path = "/api/location",
    tag = "location",
    operation_id = "updateLocation",
    summary = "Update the location fix",
    description = "Sets the location used for geofence conditions. Without a fix, \
        rules with an active geofence do not block.",
    request_body = UpdateLocationRequest,
    responses(
        (status = 200, description = "Location updated", body = UpdateLocationResponse),
        (status = 400, description = "Coordinates out of range", body = super::error::ErrorResponse),
        (status = 503, description = "Engine is not running", body = super::error::ErrorResponse)
    )
)]
pub async fn update_location(
    State(state): State<SharedState>,
    Json(request): Json<UpdateLocationRequest>,
) -> ApiResult<Json<UpdateLocationResponse>> {
    if let Some(location) = request.location {
        if !location.is_valid() {
            return Err(ApiError::bad_request(
                "invalid_location",
                format!(
                    "Coordinates ({}, {}) are out of range",
                    location.latitude, location.longitude
                ),
            ));
        }
    }

    state.engine().update_location(request.location).await?;

    Ok(Json(UpdateLocationResponse {
        success: true,
        location: request.location,
    }))
}
