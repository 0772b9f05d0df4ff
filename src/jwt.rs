use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};

use crate::app::AppState;
use crate::audit::RequestContext;
use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
}

impl JwtConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        let exp_hours = std::env::var("JWT_EXP_HOURS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(24))
            .map_err(|_| AppError::configuration("JWT_EXP_HOURS must be a valid integer"))?;

        Self::new(secret.into_bytes(), exp_hours)
    }

    /// Rejects lifetimes that are not positive or that overflow the clock.
    pub fn new(secret: Vec<u8>, exp_hours: i64) -> Result<Self, AppError> {
        let config = Self {
            secret: Arc::new(secret),
            exp_hours,
        };
        if exp_hours <= 0 {
            return Err(AppError::configuration("JWT_EXP_HOURS must be positive"));
        }
        config.expiry_from(chrono::Utc::now())?;
        Ok(config)
    }

    fn expiry_from(&self, now: chrono::DateTime<chrono::Utc>) -> Result<chrono::DateTime<chrono::Utc>, AppError> {
        chrono::Duration::try_hours(self.exp_hours)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| AppError::configuration(format!("JWT_EXP_HOURS out of range: {}", self.exp_hours)))
    }

    /// Token issuance lives outside this service; this is used by operators
    /// and tests to mint a bearer token for a known username.
    pub fn encode(&self, username: &str) -> Result<String, AppError> {
        let now = chrono::Utc::now();
        let exp = self.expiry_from(now)?;

        let claims = Claims {
            sub: username.to_string(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::token(err.to_string()))
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    /// Username of the authenticated caller
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

/// Authenticated caller plus the request context carried into audit records.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
    pub context: RequestContext,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;

        let claims = state.jwt.decode(token)?;

        Ok(AuthUser {
            username: claims.sub,
            context: RequestContext::from_headers(&parts.headers),
        })
    }
}
