use crate::api::middleware::{RequireAuth, SpotifyToken};
use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::{CachedQueueItem, EnqueueTrackRequest, LoadQueueRequest, QueueEntry};
use crate::services::LoadSummary;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{future, stream::Stream, StreamExt};
use std::{convert::Infallible, sync::Arc};
use tokio_stream::wrappers::BroadcastStream;
use validator::Validate;

pub fn queue_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/queue", get(get_queue).delete(clear_queue))
        .route("/queue/load", post(load_queue))
        .route("/queue/cache", get(get_cached_queue))
        .route("/queue/tracks", post(enqueue_track))
        .route("/queue/events", get(queue_events))
}

async fn load_queue(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id): RequireAuth,
    SpotifyToken(token): SpotifyToken,
    Json(req): Json<LoadQueueRequest>,
) -> Result<Json<LoadSummary>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    tracing::info!("Loading queue from {} for user {}", req.context_uri, user_id);
    let summary = state
        .engine
        .load_context(user_id, &token, &req.context_uri)
        .await?;

    Ok(Json(summary))
}

async fn get_queue(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id): RequireAuth,
) -> Result<Json<Vec<QueueEntry>>> {
    Ok(Json(state.engine.queue(user_id).await?))
}

async fn get_cached_queue(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id): RequireAuth,
) -> Result<Json<Vec<CachedQueueItem>>> {
    Ok(Json(state.engine.cached_queue(user_id).await?))
}

async fn clear_queue(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id): RequireAuth,
) -> Result<StatusCode> {
    state.engine.clear(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enqueue_track(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id): RequireAuth,
    SpotifyToken(token): SpotifyToken,
    Json(req): Json<EnqueueTrackRequest>,
) -> Result<Json<QueueEntry>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let entry = state
        .engine
        .enqueue_track(user_id, &token, &req.track_id, req.position)
        .await?;

    Ok(Json(entry))
}

/// SSE stream of this user's queue changes
async fn queue_events(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id): RequireAuth,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.engine.subscribe()).filter_map(move |event| {
        // Lagged receivers drop the missed events and keep going
        let event = match event {
            Ok(event) if event.user_id() == user_id => {
                let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
                Some(Ok(Event::default().data(data)))
            }
            _ => None,
        };
        future::ready(event)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use crate::api::middleware::SPOTIFY_TOKEN_HEADER;
    use crate::api::{api_router, AppState};
    use crate::services::queue_engine::tests::{engine_with, track, StaticCatalog};
    use crate::services::AuthService;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &str = "an-hs256-test-secret-of-32-chars!!";

    fn app() -> (Router, String) {
        let mut catalog = StaticCatalog::default();
        catalog.contexts.insert(
            "p1".to_string(),
            vec![track("t1", "a"), track("t2", "b"), track("t3", "a")],
        );
        let (_, engine) = engine_with(catalog);
        let auth = AuthService::from_secret(SECRET.to_string());
        let token = auth
            .issue_token(Uuid::new_v4(), chrono::Duration::hours(1))
            .unwrap();

        let state = Arc::new(AppState {
            engine: Arc::new(engine),
            auth_service: Arc::new(auth),
        });
        (api_router(state), token)
    }

    fn request(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {}", token))
            .header(SPOTIFY_TOKEN_HEADER, "spotify-token")
            .header("content-type", "application/json");
        match body {
            Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_valid_token() {
        let (app, _) = app();

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/v1/queue").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request("GET", "/api/v1/queue", "not-a-jwt", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_load_then_read_queue() {
        let (app, token) = app();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/queue/load",
                &token,
                Some(json!({ "context_uri": "spotify:playlist:p1" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["tracks"], 3);

        let response = app
            .clone()
            .oneshot(request("GET", "/api/v1/queue", &token, None))
            .await
            .unwrap();
        let queue = json_body(response).await;
        let positions: Vec<i64> = queue
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["position"].as_i64().unwrap())
            .collect();
        assert_eq!(positions, vec![0, 100, 200]);

        let response = app
            .clone()
            .oneshot(request("GET", "/api/v1/queue/cache", &token, None))
            .await
            .unwrap();
        assert_eq!(json_body(response).await.as_array().unwrap().len(), 3);

        let response = app
            .clone()
            .oneshot(request("DELETE", "/api/v1/queue", &token, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(request("GET", "/api/v1/queue", &token, None))
            .await
            .unwrap();
        assert!(json_body(response).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_validates_request() {
        let (app, token) = app();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/queue/load",
                &token,
                Some(json!({ "context_uri": "" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/queue/load",
                &token,
                Some(json!({ "context_uri": "spotify:show:p1" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Provider token is required for catalog calls
        let missing_provider_token = Request::builder()
            .method("POST")
            .uri("/api/v1/queue/load")
            .header("Authorization", format!("Bearer {}", token))
            .header("content-type", "application/json")
            .body(Body::from(json!({ "context_uri": "spotify:playlist:p1" }).to_string()))
            .unwrap();
        let response = app.oneshot(missing_provider_token).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_enqueue_track() {
        let (app, token) = app();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/queue/tracks",
                &token,
                Some(json!({ "track_id": "t2" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let entry = json_body(response).await;
        assert_eq!(entry["position"], 0);
        assert_eq!(entry["track_uri"], "spotify:track:t2");

        let response = app
            .oneshot(request(
                "POST",
                "/api/v1/queue/tracks",
                &token,
                Some(json!({ "track_id": "t1", "position": -5 })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
