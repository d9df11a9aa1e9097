// src/db.rs
use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{
    postgres::{PgListener, PgPoolOptions},
    types::Json,
    PgPool,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    store::{check_body_id, doc_created_at, doc_id, doc_str, feeds, ChangeEvent, DocumentStore, Key, Table},
};

const CHANGE_CHANNEL: &str = "livepoll_changes";

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Payload sent through `pg_notify` after a replace commits.
#[derive(Debug, Serialize, Deserialize)]
struct Notification {
    table: Table,
    id: Uuid,
}

/// Documents kept as JSONB, one Postgres table per [`Table`].
///
/// Replaces notify `livepoll_changes` inside the writing transaction, so
/// listeners hear about a write only once it has committed. The listener
/// task re-reads the row and forwards it on the table's feed.
pub struct PgStore {
    pool: PgPool,
    feeds: HashMap<Table, broadcast::Sender<ChangeEvent>>,
    listener: JoinHandle<()>,
}

impl PgStore {
    pub async fn connect(pool: PgPool, feed_capacity: usize) -> AppResult<Self> {
        migrate(&pool).await?;

        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;

        let feeds = feeds(feed_capacity);
        let listener = tokio::spawn(forward_notifications(listener, pool.clone(), feeds.clone()));

        info!("Postgres store ready, listening on {CHANGE_CHANNEL}");

        Ok(Self {
            pool,
            feeds,
            listener,
        })
    }
}

impl Drop for PgStore {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn migrate(pool: &PgPool) -> AppResult<()> {
    for table in Table::ALL {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id UUID PRIMARY KEY,
                unique_url TEXT NOT NULL UNIQUE,
                results_url TEXT NOT NULL UNIQUE,
                owner_id TEXT,
                body JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            table.name()
        );
        sqlx::query(&ddl).execute(pool).await?;
    }

    Ok(())
}

async fn read_body(pool: &PgPool, table: Table, id: Uuid) -> AppResult<Option<Value>> {
    let sql = format!("SELECT body FROM {} WHERE id = $1", table.name());
    let body = sqlx::query_scalar::<_, Json<Value>>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(body.map(|Json(doc)| doc))
}

async fn forward_notifications(
    mut listener: PgListener,
    pool: PgPool,
    feeds: HashMap<Table, broadcast::Sender<ChangeEvent>>,
) {
    loop {
        let notification = match listener.recv().await {
            Ok(notification) => notification,
            Err(e) => {
                // recv reconnects on the next call; anything sent meanwhile is gone.
                warn!("Change listener dropped: {e}");
                for feed in feeds.values() {
                    let _ = feed.send(ChangeEvent::Lost);
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let Notification { table, id } = match serde_json::from_str(notification.payload()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Ignoring malformed change payload: {e}");
                continue;
            }
        };

        let read = read_body(&pool, table, id).await;
        forward_read(&feeds[&table], table, id, read);
    }
}

/// Publish the re-read state of a changed document. A failed read means
/// the change is never delivered, so subscribers are told the feed is lost.
fn forward_read(
    feed: &broadcast::Sender<ChangeEvent>,
    table: Table,
    id: Uuid,
    read: AppResult<Option<Value>>,
) {
    match read {
        Ok(Some(doc)) => {
            debug!("Forwarding change for {id} in {}", table.name());
            let _ = feed.send(ChangeEvent::Updated { id, doc });
        }
        Ok(None) => debug!("Changed document {id} is gone"),
        Err(e) => {
            warn!("Failed to read changed document {id}: {e}");
            let _ = feed.send(ChangeEvent::Lost);
        }
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn get_by_key(&self, table: Table, key: Key<'_>) -> AppResult<Option<Value>> {
        let sql = format!("SELECT body FROM {} WHERE {} = $1", table.name(), key.field());
        let query = sqlx::query_scalar::<_, Json<Value>>(&sql);
        let query = match key {
            Key::Id(id) => query.bind(id),
            Key::UniqueUrl(url) | Key::ResultsUrl(url) => query.bind(url),
        };

        let body = query.fetch_optional(&self.pool).await?;
        Ok(body.map(|Json(doc)| doc))
    }

    async fn insert(&self, table: Table, doc: Value) -> AppResult<Uuid> {
        let id = doc_id(&doc)?;
        let unique_url = doc_str(&doc, "unique_url")?.to_owned();
        let results_url = doc_str(&doc, "results_url")?.to_owned();
        let owner_id = doc.get("owner_id").and_then(Value::as_str).map(str::to_owned);
        let created_at = doc_created_at(&doc).unwrap_or_else(Utc::now);

        let sql = format!(
            "INSERT INTO {} (id, unique_url, results_url, owner_id, body, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            table.name()
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(unique_url)
            .bind(results_url)
            .bind(owner_id)
            .bind(Json(doc))
            .bind(created_at)
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    async fn replace(&self, table: Table, id: Uuid, doc: Value) -> AppResult<()> {
        check_body_id(&doc, id)?;
        let payload = serde_json::to_string(&Notification { table, id })?;
        let sql = format!("UPDATE {} SET body = $2 WHERE id = $1", table.name());

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(&sql)
            .bind(id)
            .bind(Json(doc))
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CHANGE_CHANNEL)
            .bind(payload)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_owner(&self, table: Table, owner_id: &str) -> AppResult<Vec<Value>> {
        let sql = format!(
            "SELECT body FROM {} WHERE owner_id = $1 ORDER BY created_at DESC",
            table.name()
        );
        let bodies = sqlx::query_scalar::<_, Json<Value>>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(bodies.into_iter().map(|Json(doc)| doc).collect())
    }

    fn changes(&self, table: Table) -> broadcast::Receiver<ChangeEvent> {
        self.feeds[&table].subscribe()
    }
}
