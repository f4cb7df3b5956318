use crate::api::AppState;
use crate::error::{AppError, Result};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;
use uuid::Uuid;

pub const SPOTIFY_TOKEN_HEADER: &str = "X-Spotify-Token";

/// The authenticated user's id, taken from the token's `sub` claim
pub struct RequireAuth(pub Uuid);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self> {
        // Try to get token from Authorization header first
        let token = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .or_else(|| {
                // Fall back to query parameter for SSE (EventSource can't send custom headers)
                parts.uri.query().and_then(|q| {
                    q.split('&')
                        .find(|p| p.starts_with("token="))
                        .and_then(|p| p.strip_prefix("token="))
                })
            })
            .ok_or(AppError::Unauthorized)?;

        let claims = state.auth_service.verify_token(token)?;

        Ok(RequireAuth(claims.sub))
    }
}

/// Provider access token forwarded by the client
pub struct SpotifyToken(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SpotifyToken {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .headers
            .get(SPOTIFY_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| SpotifyToken(v.to_string()))
            .ok_or_else(|| AppError::Validation(format!("Missing {} header", SPOTIFY_TOKEN_HEADER)))
    }
}
