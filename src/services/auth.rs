use crate::config::Config;
use crate::error::{AppError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Verifies the user tokens issued by the persistence backend.
pub struct AuthService {
    jwt_secret: String,
}

impl AuthService {
    pub fn new(config: &Config) -> Self {
        Self::from_secret(config.jwt_secret.clone())
    }

    pub fn from_secret(jwt_secret: String) -> Self {
        Self { jwt_secret }
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        // Backend tokens carry an audience we do not pin
        validation.validate_aud = false;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|_| AppError::Unauthorized)?;

        Ok(token_data.claims)
    }

    /// Sign a token for `user_id`, for local tooling and tests
    pub fn issue_token(&self, user_id: Uuid, ttl: Duration) -> Result<String> {
        let claims = Claims {
            sub: user_id,
            exp: (Utc::now() + ttl).timestamp(),
            role: Some("authenticated".to_string()),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Token generation failed: {}", e)))
    }
}
