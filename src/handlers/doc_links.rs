use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use tracing::error;

use crate::auth::CallerIdentity;
use crate::models::{ApiError, CreateShareLinkRequest, ShareLink, ShareLinkListResponse, ShareLinkResponse};
use crate::services::share_service::share_url;
use crate::state::SharedState;
use crate::SyncError;

fn link_response(state: &SharedState, doc_id: &str, index: usize, link: ShareLink) -> ShareLinkResponse {
    let url = share_url(&state.app_origin, doc_id, &link.token);
    ShareLinkResponse { index, link, url }
}

fn log_failure(action: &str, doc_id: &str, e: SyncError) -> ApiError {
    error!("Failed to {} share links of document {}: {}", action, doc_id, e);
    e.into_api_error()
}

/// List the share links of a document (owner only)
pub async fn doc_links_list(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(doc_id): Path<String>,
) -> Result<(StatusCode, Json<ShareLinkListResponse>), ApiError> {
    let links = state
        .shares
        .list(&doc_id, caller.id())
        .await
        .map_err(|e| log_failure("list", &doc_id, e))?;

    let links = links
        .into_iter()
        .enumerate()
        .map(|(index, link)| link_response(&state, &doc_id, index, link))
        .collect();
    Ok((StatusCode::OK, Json(ShareLinkListResponse { links })))
}

/// Issue a view or edit share link (owner only)
pub async fn doc_links_create(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(doc_id): Path<String>,
    Json(request): Json<CreateShareLinkRequest>,
) -> Result<(StatusCode, Json<ShareLinkResponse>), ApiError> {
    let (index, link) = state
        .shares
        .issue(&doc_id, caller.id(), request.permission)
        .await
        .map_err(|e| log_failure("issue", &doc_id, e))?;

    Ok((StatusCode::CREATED, Json(link_response(&state, &doc_id, index, link))))
}

/// Revoke the share link at `index` (owner only)
pub async fn doc_links_revoke(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Path((doc_id, index)): Path<(String, usize)>,
) -> Result<(StatusCode, Json<ShareLinkResponse>), ApiError> {
    let removed = state
        .shares
        .revoke(&doc_id, caller.id(), index)
        .await
        .map_err(|e| log_failure("revoke", &doc_id, e))?;

    Ok((StatusCode::OK, Json(link_response(&state, &doc_id, index, removed))))
}
