use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info, warn};

use crate::auth::CallerIdentity;
use crate::models::{ApiError, DocumentResponse, OpenDocumentQuery};
use crate::services::access_service;
use crate::state::SharedState;
use crate::ws::render_view;
use crate::SyncError;

/// Open-time access check: returns the document as the caller may see it.
///
/// Nothing is registered or subscribed; live editing goes through the
/// websocket session host.
pub async fn doc_open(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(doc_id): Path<String>,
    Query(query): Query<OpenDocumentQuery>,
) -> Result<(StatusCode, Json<DocumentResponse>), ApiError> {
    let doc = match state.store().get(&doc_id).await {
        Ok(Some(doc)) => doc,
        Ok(None) => {
            warn!("Document {} not found", doc_id);
            return Err(SyncError::DocumentNotFound(doc_id).into_api_error());
        }
        Err(e) => {
            error!("Failed to load document {}: {}", doc_id, e);
            return Err(SyncError::from(e).into_api_error());
        }
    };

    let permission = access_service::evaluate(&doc, caller.id(), query.token.as_deref()).map_err(|e| {
        warn!("Access to document {} denied: {}", doc_id, e);
        e.into_api_error()
    })?;
    info!("Document {} opened with permission {}", doc_id, permission);

    let view = render_view(
        &doc,
        permission,
        None,
        state.clock().now(),
        state.sessions.settings.presence.stale_after,
    );
    Ok((StatusCode::OK, Json(DocumentResponse::from(view))))
}
