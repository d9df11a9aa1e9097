// src/store.rs
use std::{
    cmp::Reverse,
    collections::HashMap,
    sync::RwLock,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Polls,
    Surveys,
}

impl Table {
    pub const ALL: [Table; 2] = [Table::Polls, Table::Surveys];

    pub fn name(self) -> &'static str {
        match self {
            Table::Polls => "polls",
            Table::Surveys => "surveys",
        }
    }
}

/// Unique lookup field of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'a> {
    Id(Uuid),
    UniqueUrl(&'a str),
    ResultsUrl(&'a str),
}

impl Key<'_> {
    pub fn field(&self) -> &'static str {
        match self {
            Key::Id(_) => "id",
            Key::UniqueUrl(_) => "unique_url",
            Key::ResultsUrl(_) => "results_url",
        }
    }

    fn matches(&self, doc: &Value) -> bool {
        let field = doc.get(self.field()).and_then(Value::as_str);
        match self {
            Key::Id(id) => field.and_then(|s| s.parse::<Uuid>().ok()) == Some(*id),
            Key::UniqueUrl(url) | Key::ResultsUrl(url) => field == Some(*url),
        }
    }
}

/// One message on a table's change feed.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// A document was replaced; `doc` is its post-write state.
    Updated { id: Uuid, doc: Value },
    /// The store lost its notification connection; updates may have been missed.
    Lost,
}

/// Point reads, inserts and whole-document replaces over JSON documents,
/// plus a per-table change feed.
///
/// `replace` is last-write-wins. A store offering conditional writes may
/// fail it with [`AppError::Conflict`] instead of overwriting.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_by_key(&self, table: Table, key: Key<'_>) -> AppResult<Option<Value>>;

    async fn insert(&self, table: Table, doc: Value) -> AppResult<Uuid>;

    async fn replace(&self, table: Table, id: Uuid, doc: Value) -> AppResult<()>;

    /// Documents whose `owner_id` equals `owner_id`, newest first.
    async fn find_by_owner(&self, table: Table, owner_id: &str) -> AppResult<Vec<Value>>;

    fn changes(&self, table: Table) -> broadcast::Receiver<ChangeEvent>;
}

pub(crate) fn doc_id(doc: &Value) -> AppResult<Uuid> {
    doc.get("id")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| AppError::Serialization("document has no valid id".to_string()))
}

/// A replacement body must name the document it replaces.
pub(crate) fn check_body_id(doc: &Value, id: Uuid) -> AppResult<()> {
    let body_id = doc_id(doc)?;
    if body_id != id {
        return Err(AppError::Serialization(format!(
            "body id {body_id} does not match {id}"
        )));
    }
    Ok(())
}

pub(crate) fn doc_str<'a>(doc: &'a Value, field: &str) -> AppResult<&'a str> {
    doc.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Serialization(format!("document has no {field}")))
}

pub(crate) fn doc_created_at(doc: &Value) -> Option<DateTime<Utc>> {
    doc.get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

pub(crate) fn feeds(capacity: usize) -> HashMap<Table, broadcast::Sender<ChangeEvent>> {
    Table::ALL
        .into_iter()
        .map(|table| (table, broadcast::channel(capacity.max(1)).0))
        .collect()
}

/// In-process store backed by a map per table.
pub struct MemoryStore {
    tables: RwLock<HashMap<Table, HashMap<Uuid, Value>>>,
    feeds: HashMap<Table, broadcast::Sender<ChangeEvent>>,
}

impl MemoryStore {
    pub fn new(feed_capacity: usize) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            feeds: feeds(feed_capacity),
        }
    }

    /// Emit [`ChangeEvent::Lost`] on a table's feed, as a dropped connection would.
    pub fn disconnect_feed(&self, table: Table) {
        if let Some(feed) = self.feeds.get(&table) {
            let _ = feed.send(ChangeEvent::Lost);
        }
    }

    fn poisoned<T>(_: T) -> AppError {
        AppError::StoreUnavailable("memory store lock poisoned".to_string())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_by_key(&self, table: Table, key: Key<'_>) -> AppResult<Option<Value>> {
        let tables = self.tables.read().map_err(Self::poisoned)?;
        let Some(docs) = tables.get(&table) else {
            return Ok(None);
        };

        let found = match key {
            Key::Id(id) => docs.get(&id).cloned(),
            _ => docs.values().find(|doc| key.matches(doc)).cloned(),
        };

        Ok(found)
    }

    async fn insert(&self, table: Table, doc: Value) -> AppResult<Uuid> {
        let id = doc_id(&doc)?;
        let unique_url = doc_str(&doc, "unique_url")?;
        let results_url = doc_str(&doc, "results_url")?;

        let mut tables = self.tables.write().map_err(Self::poisoned)?;
        let docs = tables.entry(table).or_default();

        let collides = docs.contains_key(&id)
            || docs.values().any(|existing| {
                Key::UniqueUrl(unique_url).matches(existing)
                    || Key::ResultsUrl(results_url).matches(existing)
            });
        if collides {
            return Err(AppError::Conflict);
        }

        docs.insert(id, doc);
        debug!("Inserted {id} into {}", table.name());

        Ok(id)
    }

    async fn replace(&self, table: Table, id: Uuid, doc: Value) -> AppResult<()> {
        check_body_id(&doc, id)?;
        {
            let mut tables = self.tables.write().map_err(Self::poisoned)?;
            let slot = tables
                .get_mut(&table)
                .and_then(|docs| docs.get_mut(&id))
                .ok_or(AppError::NotFound)?;
            *slot = doc.clone();
        }

        if let Some(feed) = self.feeds.get(&table) {
            // No receivers is fine: nobody is watching.
            let _ = feed.send(ChangeEvent::Updated { id, doc });
        }

        Ok(())
    }

    async fn find_by_owner(&self, table: Table, owner_id: &str) -> AppResult<Vec<Value>> {
        let tables = self.tables.read().map_err(Self::poisoned)?;
        let mut owned: Vec<Value> = tables
            .get(&table)
            .map(|docs| {
                docs.values()
                    .filter(|doc| doc.get("owner_id").and_then(Value::as_str) == Some(owner_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        owned.sort_by_key(|doc| Reverse(doc_created_at(doc)));
        Ok(owned)
    }

    fn changes(&self, table: Table) -> broadcast::Receiver<ChangeEvent> {
        self.feeds[&table].subscribe()
    }
}
