use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use crate::auth::CallerIdentity;
use crate::models::ErrorResponse;
use crate::services::auth_service::{get_auth_token, AuthError};
use crate::state::SharedState;

/// Resolves the caller's identity and stores it as a [`CallerIdentity`]
/// request extension. Requests without credentials pass through anonymously;
/// requests with bad credentials are rejected.
pub async fn identity_middleware(State(state): State<SharedState>, mut req: Request, next: Next) -> Response {
    // 1. Get the auth token from the request, if any
    let token = match get_auth_token(&req) {
        Ok(Some(token)) => token,
        Ok(None) => {
            debug!("Anonymous request to {}", req.uri().path());
            req.extensions_mut().insert(CallerIdentity(None));
            return next.run(req).await;
        }
        Err(e) => {
            error!("Rejected credentials: {}", e);
            return ErrorResponse::with_status(StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    // 2. Validate it
    let identity = match state.identities.resolve(&token) {
        Ok(identity) => identity,
        Err(AuthError::NotConfigured) => {
            error!("Auth JWT secret not configured");
            return ErrorResponse::with_status(StatusCode::INTERNAL_SERVER_ERROR, "Authentication is not configured")
                .into_response();
        }
        Err(e) => {
            error!("{}", e);
            return ErrorResponse::with_status(StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    // 3. Hand it to downstream handlers
    req.extensions_mut().insert(CallerIdentity(Some(identity)));
    next.run(req).await
}
