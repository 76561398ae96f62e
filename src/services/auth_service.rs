use axum::http::{self};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use moka::sync::Cache;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::Identity;

/// How long a validated token keeps resolving without being decoded again.
const IDENTITY_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed credentials: {0}")]
    Malformed(String),

    #[error("JWT validation failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token has no 'sub' claim")]
    MissingSubject,

    #[error("no JWT secret configured")]
    NotConfigured,
}

// Get the auth token from a request, if it carries one
pub fn get_auth_token<B>(req: &http::Request<B>) -> Result<Option<String>, AuthError> {
    // 1. Try the Authorization header
    if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AuthError::Malformed("invalid Authorization header".to_string()))?;
        return Ok(Some(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).to_string()));
    }

    // 2. Fall back to the auth_token cookie
    let Some(cookie_header) = req.headers().get(http::header::COOKIE) else {
        return Ok(None);
    };
    let cookie_header = cookie_header
        .to_str()
        .map_err(|_| AuthError::Malformed("invalid Cookie header".to_string()))?;
    for cookie in cookie::Cookie::split_parse(cookie_header).flatten() {
        if cookie.name() == "auth_token" {
            return Ok(Some(cookie.value().to_string()));
        }
    }
    Ok(None)
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

/// `sub` is the identity; `email`, when present, is its display name.
pub fn identity_from_claims(claims: &serde_json::Value) -> Result<Identity, AuthError> {
    let sub = claims
        .get("sub")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::MissingSubject)?;
    let identity = Identity::new(sub);
    Ok(match claims.get("email").and_then(|v| v.as_str()) {
        Some(email) => identity.with_display_name(email),
        None => identity,
    })
}

/// Turns bearer tokens into identities, remembering recent ones.
#[derive(Clone)]
pub struct IdentityResolver {
    secret: Option<String>,
    cache: Cache<String, Identity>,
}

impl IdentityResolver {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret,
            cache: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(IDENTITY_TTL)
                .build(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    pub fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        if let Some(identity) = self.cache.get(token) {
            debug!("Identity {} served from cache", identity.id);
            return Ok(identity);
        }

        let secret = self.secret.as_deref().ok_or(AuthError::NotConfigured)?;
        let token_data = validate_jwt(token, secret)?;
        let identity = identity_from_claims(&token_data.claims)?;
        info!("JWT token validated successfully for user: {}", identity.id);

        self.cache.insert(token.to_string(), identity.clone());
        Ok(identity)
    }
}
