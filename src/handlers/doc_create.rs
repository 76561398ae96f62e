use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info};

use crate::auth::{self, CallerIdentity};
use crate::models::{ApiError, CreateDocumentRequest, Document, DocumentResponse, Permission};
use crate::state::SharedState;
use crate::ws::render_view;

/// Create a document owned by the caller
pub async fn doc_create(
    State(state): State<SharedState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentResponse>), ApiError> {
    let owner = auth::ensure_authenticated(&caller)?;

    let name = match request.name.trim() {
        "" => crate::ws::docsession::UNTITLED,
        name => name,
    };
    let mut doc = Document::new(&owner.id, name, state.clock().now());
    if let Some(content) = &request.content {
        doc = doc.with_content(content);
    }

    if let Err(e) = state.store().insert(doc.clone()).await {
        error!("Failed to create document for {}: {}", owner.id, e);
        return Err(crate::SyncError::from(e).into_api_error());
    }
    info!("Created document {} for {}", doc.id, owner.id);

    let view = render_view(
        &doc,
        Permission::Edit,
        None,
        state.clock().now(),
        state.sessions.settings.presence.stale_after,
    );
    Ok((StatusCode::CREATED, Json(DocumentResponse::from(view))))
}
