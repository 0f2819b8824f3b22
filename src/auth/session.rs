//! JWT session tokens.

use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::errors::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

pub fn create_token(user_id: &str, config: &Config) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = SessionClaims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + config.jwt_expiry).timestamp(),
    };
    let key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
    encode(&Header::default(), &claims, &key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("create JWT: {e}")))
}

/// Returns the user id carried by a valid, unexpired token.
pub fn verify_token(token: &str, config: &Config) -> Result<String, AppError> {
    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let data = decode::<SessionClaims>(token, &key, &Validation::default()).map_err(|e| match e.kind() {
        ErrorKind::InvalidKeyFormat | ErrorKind::Crypto(_) => {
            AppError::Internal(anyhow::anyhow!("JWT verification: {e}"))
        }
        _ => AppError::unauthorized("Not authorized, token invalid or expired"),
    })?;
    Ok(data.claims.sub)
}
