//! REST endpoints for volunteer responses.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::api::response::ResponseService;
use crate::error::PipelineError;

/// Shared state for the response routes.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<ResponseService>,
}

#[derive(Debug, Deserialize)]
struct RespondBody {
    accept: Option<bool>,
}

/// POST /api/requests/{id}/response
///
/// Body: `{"accept": true|false}`. The volunteer id comes from the
/// session layer in front of this service; here it is a header the
/// reverse proxy injects.
async fn respond(
    State(state): State<ApiState>,
    Path(request_id): Path<Uuid>,
    volunteer: VolunteerId,
    Json(body): Json<RespondBody>,
) -> impl IntoResponse {
    let Some(accept) = body.accept else {
        return error_response(&PipelineError::InvalidArgument(
            "Missing 'accept' field".to_string(),
        ));
    };

    match state.service.respond(volunteer.0, request_id, accept).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({ "outcome": format!("{outcome:?}").to_lowercase() })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /api/requests/{id}/accept
///
/// Public self-accept of an open request.
async fn self_accept(
    State(state): State<ApiState>,
    Path(request_id): Path<Uuid>,
    volunteer: VolunteerId,
) -> impl IntoResponse {
    match state.service.self_accept(volunteer.0, request_id).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(serde_json::json!({ "ok": true }))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Map pipeline errors to HTTP statuses. Expected conditions get their
/// own codes; everything else is reported and becomes a 500.
fn error_response(e: &PipelineError) -> axum::response::Response {
    let status = match e {
        PipelineError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        PipelineError::Authorisation { .. } => StatusCode::FORBIDDEN,
        PipelineError::AssignmentNotFound { .. } => StatusCode::NOT_FOUND,
        PipelineError::DuplicateResponse { .. } | PipelineError::CapacityExceeded { .. } => {
            StatusCode::CONFLICT
        }
        _ => {
            error!(error = %e, "Response endpoint failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

/// Volunteer identity extracted from the `x-volunteer-id` header.
struct VolunteerId(Uuid);

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for VolunteerId {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-volunteer-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .map(VolunteerId)
            .ok_or((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "Missing volunteer identity" })),
            ))
    }
}

/// Build the response REST routes.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/api/requests/{request_id}/response", post(respond))
        .route("/api/requests/{request_id}/accept", post(self_accept))
        .with_state(state)
}
