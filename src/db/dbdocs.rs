use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Iden, PostgresQueryBuilder, Query};
use sea_query_binder::SqlxBinder;
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Error as SqlxError;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::store::{DocumentStore, Subscription};
use crate::error::StoreError;
use crate::models::{Document, DocumentPatch, Presence, ShareLink};

/// Notification channel carrying the id of every committed document update.
pub const CHANGE_CHANNEL: &str = "document_changes";

const SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        name TEXT NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        last_modified TIMESTAMPTZ NOT NULL,
        active_users JSONB NOT NULL DEFAULT '[]',
        share_links JSONB NOT NULL DEFAULT '[]'
    )
"#;

const SELECT_DOCUMENT_SQL: &str = r#"
    SELECT id, owner_id, name, content, last_modified, active_users, share_links
    FROM documents
    WHERE id = $1
"#;

#[derive(Iden)]
enum Documents {
    Table,
    Id,
    Name,
    Content,
    LastModified,
    ActiveUsers,
    ShareLinks,
}

/// Document Row from database
#[derive(Debug, Clone, sqlx::FromRow)]
struct DocumentRow {
    id: String,
    owner_id: String,
    name: String,
    content: String,
    last_modified: DateTime<Utc>,
    active_users: Json<Vec<Presence>>,
    share_links: Json<Vec<ShareLink>>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            content: row.content,
            last_modified: row.last_modified,
            active_users: row.active_users.0,
            share_links: row.share_links.0,
        }
    }
}

async fn fetch_document(pool: &PgPool, id: &str) -> Result<Option<Document>, SqlxError> {
    let row = sqlx::query_as::<_, DocumentRow>(SELECT_DOCUMENT_SQL)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(Document::from))
}

/// PostgreSQL-backed document store.
///
/// Partial updates are built per patch so that only the present columns are
/// written; each commit is announced on [`CHANGE_CHANNEL`].
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Create a new database connection pool and make sure the schema exists
    pub async fn connect(database_url: &str) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn log_pool_state(&self, action: &str, id: &str) {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        debug!(
            "{} document {}. Pool connections: {} idle, {} in use",
            action,
            id,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        self.log_pool_state("Loading", id);
        Ok(fetch_document(&self.pool, id).await?)
    }

    async fn subscribe(&self, id: &str) -> Result<Subscription, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let pool = self.pool.clone();
        let doc_id = id.to_string();
        let task = tokio::spawn(async move {
            loop {
                let notification = match listener.recv().await {
                    Ok(notification) => notification,
                    Err(e) => {
                        error!("Change listener for document {} failed: {}", doc_id, e);
                        break;
                    }
                };
                if notification.payload() != doc_id {
                    continue;
                }
                match fetch_document(&pool, &doc_id).await {
                    Ok(Some(doc)) => {
                        if tx.send(doc).is_err() {
                            break;
                        }
                    }
                    Ok(None) => warn!("Document {} disappeared after a change notification", doc_id),
                    Err(e) => error!("Failed to reload document {} after change: {}", doc_id, e),
                }
            }
            debug!("Change listener for document {} stopped", doc_id);
        });

        Ok(Subscription::new(id, rx).with_listener(task.abort_handle()))
    }

    async fn update(&self, id: &str, patch: DocumentPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        self.log_pool_state("Updating", id);

        let mut query = Query::update();
        query.table(Documents::Table);
        if let Some(name) = patch.name {
            query.value(Documents::Name, name);
        }
        if let Some(content) = patch.content {
            query.value(Documents::Content, content);
        }
        if let Some(last_modified) = patch.last_modified {
            query.value(Documents::LastModified, last_modified);
        }
        if let Some(active_users) = patch.active_users {
            query.value(Documents::ActiveUsers, serde_json::to_value(active_users)?);
        }
        if let Some(share_links) = patch.share_links {
            query.value(Documents::ShareLinks, serde_json::to_value(share_links)?);
        }
        query.and_where(Expr::col(Documents::Id).eq(id));
        let (sql, values) = query.build_sqlx(PostgresQueryBuilder);

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query_with(&sql, values).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CHANGE_CHANNEL)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!("Document {} updated", id);
        Ok(())
    }

    async fn insert(&self, document: Document) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, owner_id, name, content, last_modified, active_users, share_links)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&document.id)
        .bind(&document.owner_id)
        .bind(&document.name)
        .bind(&document.content)
        .bind(document.last_modified)
        .bind(Json(&document.active_users))
        .bind(Json(&document.share_links))
        .execute(&self.pool)
        .await?;

        info!("Document {} created for owner {}", document.id, document.owner_id);
        Ok(())
    }
}
