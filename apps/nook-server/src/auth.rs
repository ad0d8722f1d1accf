use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AdmissionError;

/// Claims carried by a connection token. Issued by the account service at
/// login; this server only verifies them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Expiry, seconds since epoch.
    pub exp: usize,
}

/// Verify a connection token and return the authenticated user id.
pub fn verify_token(token: &str, secret: &str) -> Result<String, AdmissionError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(data.claims.sub)
}

/// Pull the token out of the upgrade request: `?token=` wins, then
/// `Authorization: Bearer`.
pub fn token_from_request(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query_token {
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    let header = headers.get("authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?;
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
