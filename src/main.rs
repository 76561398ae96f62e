use std::panic;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use docsync::clients::UploadClient;
use docsync::config::Config;
use docsync::db::{MemoryDocumentStore, PgDocumentStore, SharedStore};
use docsync::routes::create_app;
use docsync::services::IdentityResolver;
use docsync::utils::system_clock;
use docsync::AppState;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "docsync=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    // Pick the document store
    let store: SharedStore = match &config.db_url {
        Some(db_url) => match PgDocumentStore::connect(db_url).await {
            Ok(store) => {
                info!("Database initialized successfully");
                Arc::new(store)
            }
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                warn!("Falling back to the in-memory document store");
                Arc::new(MemoryDocumentStore::new())
            }
        },
        None => {
            warn!("No database URL configured - documents are kept in memory");
            Arc::new(MemoryDocumentStore::new())
        }
    };

    if config.auth_jwt_secret.is_none() {
        warn!("No JWT secret configured - every caller is anonymous");
    }
    let identities = IdentityResolver::new(config.auth_jwt_secret.clone());
    if !identities.is_configured() {
        warn!("No JWT secret configured - only share-token access is possible");
    }

    let mut state = AppState::new(store, system_clock(), config.sync_settings(), identities)
        .with_app_origin(&config.app_origin);

    // Blob uploads are optional
    if let Some(upload_url) = &config.upload_url {
        let file_origin = config.upload_file_origin.as_deref().unwrap_or(upload_url);
        match UploadClient::new(upload_url, file_origin) {
            Ok(client) => {
                info!("Uploads go to {}", upload_url);
                state = state.with_uploads(client);
            }
            Err(e) => error!("Failed to initialize upload client: {}", e),
        }
    } else {
        warn!("No upload URL configured - attachments are disabled");
    }

    let cors_origins = config.cors_origin_list();
    if cors_origins.is_empty() && !config.is_development() {
        warn!("No CORS origins configured - allowing any origin");
    }
    let app_routes = create_app(state, &cors_origins);

    // Start the HTTP/API server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/api/v1/ws", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
