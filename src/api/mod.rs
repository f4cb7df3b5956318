pub mod middleware;
pub mod playback;
pub mod queue;

use crate::services::{AuthService, QueueEngine};
use axum::Router;
use std::sync::Arc;

pub use playback::playback_routes;
pub use queue::queue_routes;

pub struct AppState {
    pub engine: Arc<QueueEngine>,
    pub auth_service: Arc<AuthService>,
}

pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new().nest(
        "/api/v1",
        Router::new()
            .merge(queue_routes())
            .merge(playback_routes())
            .with_state(state),
    )
}
