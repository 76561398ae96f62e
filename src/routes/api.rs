use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::docs::ApiDoc;
use crate::handlers::{
    doc_create, doc_links_create, doc_links_list, doc_links_revoke, doc_open, health_check, ready_check,
    remove_presence,
};
use crate::routes::auth_middleware::identity_middleware;
use crate::state::{AppState, SharedState};
use crate::ws::wshost::websocket_handler;

/// Create API routes
pub fn create_api_routes(state: SharedState) -> Router {
    let identified = Router::new()
        .route("/v1/documents", post(doc_create))
        .route("/v1/documents/:doc_id", get(doc_open))
        .route("/v1/documents/:doc_id/links", get(doc_links_list).post(doc_links_create))
        .route("/v1/documents/:doc_id/links/:index", delete(doc_links_revoke))
        .route("/v1/ws", get(websocket_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), identity_middleware)); // Applies to all routes added above

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/remove-presence", post(remove_presence))
        .merge(identified)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(allowed).allow_credentials(true)
    }
}

/// The whole application: API under `/api`, Swagger UI, CORS and tracing.
pub fn create_app(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        // Mount API routes
        .nest("/api", create_api_routes(Arc::new(state)))
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer(cors_origins))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
}
