// src/feed.rs
use std::sync::Arc;

use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::Document,
    store::{ChangeEvent, DocumentStore},
};

/// Per-document view over a store's change feed.
#[derive(Clone)]
pub struct ChangeFeed {
    store: Arc<dyn DocumentStore>,
}

/// Live subscription to one document. Dropping it stops delivery and
/// releases the underlying feed receiver.
pub struct Subscription {
    document_id: Uuid,
    pump: JoinHandle<()>,
    deliver: JoinHandle<()>,
}

impl Subscription {
    pub fn document_id(&self) -> Uuid {
        self.document_id
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!("Closing subscription to {}", self.document_id);
        self.pump.abort();
        self.deliver.abort();
    }
}

impl ChangeFeed {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Call `on_update` with every post-write snapshot of `document_id`.
    ///
    /// Only the newest pending update is kept, so a slow callback never
    /// stalls the feed and never builds a backlog: each snapshot carries the
    /// whole document, and a callback that falls behind skips straight to
    /// the latest one. If the feed drops, `on_update` receives
    /// `Err(FeedDisconnected)` once and delivery ends; the caller re-fetches
    /// and subscribes again.
    pub fn subscribe<D, F>(&self, document_id: Uuid, on_update: F) -> Subscription
    where
        D: Document,
        F: FnMut(Result<D, AppError>) + Send + 'static,
    {
        let mut changes = self.store.changes(D::TABLE);
        let (latest, mut pending) = watch::channel::<Option<Result<D, AppError>>>(None);

        let pump = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(ChangeEvent::Updated { id, doc }) if id == document_id => {
                        match serde_json::from_value::<D>(doc) {
                            Ok(snapshot) => {
                                if latest.send(Some(Ok(snapshot))).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Undecodable snapshot for {document_id}: {e}"),
                        }
                    }
                    Ok(ChangeEvent::Updated { .. }) => {}
                    Ok(ChangeEvent::Lost) | Err(RecvError::Closed) => {
                        warn!("Change feed for {document_id} disconnected");
                        let _ = latest.send(Some(Err(AppError::FeedDisconnected)));
                        break;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Subscriber for {document_id} lagged, skipped {skipped} changes");
                    }
                }
            }
        });

        let deliver = tokio::spawn(async move {
            let mut on_update = on_update;
            // An unseen value is still reported after the pump exits.
            while pending.changed().await.is_ok() {
                let update = pending.borrow_and_update().clone();
                if let Some(update) = update {
                    on_update(update);
                }
            }
        });

        debug!("Opened subscription to {document_id} in {}", D::TABLE.name());

        Subscription {
            document_id,
            pump,
            deliver,
        }
    }
}
