use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{CollaboratorsView, Permission, SessionView, ShareLink};

/// Request body to create a document owned by the caller
#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateDocumentRequest {
    pub name: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// A document as seen by a caller who passed the access check
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub id: String,
    pub name: String,
    pub content: String,
    pub last_modified: DateTime<Utc>,
    pub permission: Permission,
    pub collaborators: CollaboratorsView,
}

impl From<SessionView> for DocumentResponse {
    fn from(view: SessionView) -> Self {
        Self {
            id: view.doc_id,
            name: view.name,
            content: view.content,
            last_modified: view.last_modified,
            permission: view.permission,
            collaborators: view.collaborators,
        }
    }
}

/// Request body to issue a share link
#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateShareLinkRequest {
    pub permission: Permission,
}

/// A share link together with its shareable URL
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShareLinkResponse {
    pub index: usize,
    #[serde(flatten)]
    pub link: ShareLink,
    pub url: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ShareLinkListResponse {
    pub links: Vec<ShareLinkResponse>,
}

/// Query of the presence teardown beacon
#[derive(Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase")]
pub struct RemovePresenceQuery {
    pub doc_id: String,
    pub presence_id: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct RemovePresenceResponse {
    pub removed: bool,
}

/// Query of the open-time access check
#[derive(Serialize, Deserialize, ToSchema, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct OpenDocumentQuery {
    #[serde(default)]
    pub token: Option<String>,
}
