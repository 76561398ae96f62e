use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Document store reachable", body = HealthResponse),
        (status = 503, description = "Document store unreachable", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Create a document owned by the caller
#[utoipa::path(
    post,
    path = "/api/v1/documents",
    request_body = CreateDocumentRequest,
    responses(
        (status = 201, description = "Document created", body = DocumentResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn doc_create_doc() {}

/// Open-time access check
#[utoipa::path(
    get,
    path = "/api/v1/documents/{doc_id}",
    params(
        ("doc_id" = String, Path, description = "Document id"),
        OpenDocumentQuery
    ),
    responses(
        (status = 200, description = "Document and the caller's permission", body = DocumentResponse),
        (status = 403, description = "Access denied", body = ErrorResponse),
        (status = 404, description = "Document not found", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn doc_open_doc() {}

/// List share links (owner only)
#[utoipa::path(
    get,
    path = "/api/v1/documents/{doc_id}/links",
    params(("doc_id" = String, Path, description = "Document id")),
    responses(
        (status = 200, description = "Share links of the document", body = ShareLinkListResponse),
        (status = 403, description = "Caller is not the owner", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn doc_links_list_doc() {}

/// Issue a share link (owner only)
#[utoipa::path(
    post,
    path = "/api/v1/documents/{doc_id}/links",
    params(("doc_id" = String, Path, description = "Document id")),
    request_body = CreateShareLinkRequest,
    responses(
        (status = 201, description = "Share link issued", body = ShareLinkResponse),
        (status = 403, description = "Caller is not the owner", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn doc_links_create_doc() {}

/// Revoke a share link (owner only)
#[utoipa::path(
    delete,
    path = "/api/v1/documents/{doc_id}/links/{index}",
    params(
        ("doc_id" = String, Path, description = "Document id"),
        ("index" = usize, Path, description = "Position of the link")
    ),
    responses(
        (status = 200, description = "Revoked share link", body = ShareLinkResponse),
        (status = 400, description = "No link at this index", body = ErrorResponse),
        (status = 403, description = "Caller is not the owner", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn doc_links_revoke_doc() {}

/// Presence teardown beacon
#[utoipa::path(
    post,
    path = "/api/remove-presence",
    params(RemovePresenceQuery),
    responses(
        (status = 200, description = "Whether the entry was present", body = RemovePresenceResponse)
    )
)]
#[allow(dead_code)]
pub async fn remove_presence_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        doc_create_doc,
        doc_open_doc,
        doc_links_list_doc,
        doc_links_create_doc,
        doc_links_revoke_doc,
        remove_presence_doc,
    ),
    components(
        schemas(
            HealthResponse,
            ErrorResponse,
            CreateDocumentRequest,
            DocumentResponse,
            CreateShareLinkRequest,
            ShareLinkResponse,
            ShareLinkListResponse,
            RemovePresenceResponse,
            ShareLink,
            Permission,
            CollaboratorsView,
            Avatar,
            SessionView,
            SaveStatus
        )
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
