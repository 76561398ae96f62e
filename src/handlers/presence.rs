use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use tracing::{debug, warn};

use crate::models::{RemovePresenceQuery, RemovePresenceResponse};
use crate::services::presence_service;
use crate::state::SharedState;

/// Teardown beacon sent by clients while the page unloads.
///
/// Best effort: failures are logged and still answered with 200, since the
/// sender is gone by the time anyone could react.
pub async fn remove_presence(
    State(state): State<SharedState>,
    Query(query): Query<RemovePresenceQuery>,
) -> (StatusCode, Json<RemovePresenceResponse>) {
    let removed = match presence_service::remove_presence(state.store(), &query.doc_id, &query.presence_id).await {
        Ok(removed) => removed,
        Err(e) => {
            warn!(
                "Failed to remove presence {} from document {}: {}",
                query.presence_id, query.doc_id, e
            );
            false
        }
    };
    debug!("Presence {} on document {} removed: {}", query.presence_id, query.doc_id, removed);
    (StatusCode::OK, Json(RemovePresenceResponse { removed }))
}
