use crate::api::middleware::RequireAuth;
use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::{PlaybackSample, PlaybackSampleRequest, TrackStartedRequest};
use crate::services::{ReorderOutcome, TrackTransition};
use axum::{extract::State, routing::post, Json, Router};
use std::sync::Arc;
use validator::Validate;

pub fn playback_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/playback/sample", post(record_sample))
        .route("/playback/started", post(track_started))
}

async fn record_sample(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id): RequireAuth,
    Json(req): Json<PlaybackSampleRequest>,
) -> Result<Json<Vec<TrackTransition>>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let sample = PlaybackSample::from(req);
    Ok(Json(state.engine.record_sample(user_id, &sample).await))
}

async fn track_started(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id): RequireAuth,
    Json(req): Json<TrackStartedRequest>,
) -> Json<ReorderOutcome> {
    Json(state.engine.track_started(user_id, req.index).await)
}
