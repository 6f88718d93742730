// HTTP handlers: version, status, series, context switch, device ingest

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::AppState;
use crate::engine::{QueryError, parse_query};
use crate::source::{ContextId, EmptyContextId};
use crate::version::{NAME, VERSION};
use crate::worker::WorkerStopped;

#[derive(Debug, thiserror::Error)]
pub(super) enum ApiError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Context(#[from] EmptyContextId),
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error(transparent)]
    Unavailable(#[from] WorkerStopped),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Query(_) | ApiError::Context(_) | ApiError::NotAnObject => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// GET /version: returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/status: current context, connection state and buffer counters.
pub(super) async fn status_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.status().await?))
}

#[derive(Debug, Deserialize)]
pub(super) struct SeriesParams {
    resolution: String,
    field: String,
}

/// GET /api/series: one field at one resolution; empty buckets are `null`.
pub(super) async fn series_handler(
    State(state): State<AppState>,
    Query(params): Query<SeriesParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (resolution, field) = parse_query(&params.resolution, &params.field)?;
    Ok(Json(state.engine.query(resolution, field).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ContextRequest {
    context_id: String,
}

/// POST /api/context: follow another device; a no-op when already following it.
pub(super) async fn switch_context_handler(
    State(state): State<AppState>,
    Json(body): Json<ContextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let context: ContextId = body.context_id.parse()?;
    Ok(Json(state.engine.switch_context(context).await?))
}

/// POST /api/devices/{device_id}/realtime: a provider push for one device.
/// Only reaches the engine when `device_id` is the followed context.
pub(super) async fn ingest_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let context: ContextId = device_id.parse()?;
    let serde_json::Value::Object(event) = body else {
        return Err(ApiError::NotAnObject);
    };
    let delivered = state.hub.publish(&context, event);
    tracing::debug!(context = %context, delivered, "device push published");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "delivered": delivered })),
    ))
}
