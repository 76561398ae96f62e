use axum::http::StatusCode;

use crate::models::{ApiError, ErrorResponse, Identity};

/// Identity attached to a request by the identity middleware. `None` for
/// anonymous callers, who may still hold a share token.
#[derive(Debug, Clone, Default)]
pub struct CallerIdentity(pub Option<Identity>);

impl CallerIdentity {
    pub fn id(&self) -> Option<&str> {
        self.0.as_ref().map(|i| i.id.as_str())
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.0.as_ref()
    }
}

pub fn ensure_authenticated(caller: &CallerIdentity) -> Result<&Identity, ApiError> {
    caller
        .identity()
        .ok_or_else(|| ErrorResponse::with_status(StatusCode::UNAUTHORIZED, "Authentication required"))
}
