// src/services.rs
use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Document, Survey, VoteReceipt},
    store::{DocumentStore, Key, Table},
};

/// Reads, votes and listings over a [`DocumentStore`]. Every store call is
/// bounded by `deadline`; nothing is retried here.
#[derive(Clone)]
pub struct VoteService {
    store: Arc<dyn DocumentStore>,
    deadline: Duration,
}

impl VoteService {
    pub fn new(store: Arc<dyn DocumentStore>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub(crate) async fn within<T, F>(&self, call: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        timeout(self.deadline, call).await?
    }

    /// Load one document, failing `NotFound` when nothing matches `key`.
    pub async fn fetch<D: Document>(&self, key: Key<'_>) -> AppResult<D> {
        let doc = self
            .within(self.store.get_by_key(D::TABLE, key))
            .await?
            .ok_or(AppError::NotFound)?;

        Ok(serde_json::from_value(doc)?)
    }

    /// Record one vote: read the latest document, count the submission,
    /// replace the whole document.
    ///
    /// There is no version check between the read and the replace. Two
    /// submissions racing through that window both start from the same
    /// counts and the later replace discards the earlier increment. Stores
    /// with conditional writes surface that race as `Conflict` instead.
    pub async fn submit_vote<D: Document>(
        &self,
        document_id: Uuid,
        submission: &D::Submission,
    ) -> AppResult<VoteReceipt> {
        let current: D = self.fetch(Key::Id(document_id)).await?;

        let next = current.tally(submission).inspect_err(|e| {
            warn!("Rejected vote for {document_id} in {}: {e}", D::TABLE.name());
        })?;
        let doc = serde_json::to_value(&next)?;

        self.within(self.store.replace(D::TABLE, document_id, doc))
            .await
            .inspect_err(|e| {
                warn!("Vote for {document_id} in {} not recorded: {e}", D::TABLE.name());
            })?;

        info!("Recorded vote for {document_id} in {}", D::TABLE.name());

        Ok(VoteReceipt {
            document_id,
            results_url: next.is_public().then(|| next.results_url().to_owned()),
        })
    }

    /// Surveys published by `owner_id`, newest first.
    pub async fn owned_surveys(&self, owner_id: &str) -> AppResult<Vec<Survey>> {
        let docs = self
            .within(self.store.find_by_owner(Table::Surveys, owner_id))
            .await?;

        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(AppError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::Value;
    use tokio::sync::broadcast;

    use super::*;
    use crate::{
        models::{AnswerSlot, Poll},
        store::{ChangeEvent, MemoryStore},
    };

    fn poll(is_public: bool) -> Poll {
        Poll {
            id: Uuid::new_v4(),
            question: "Tabs or spaces?".into(),
            answers: vec![AnswerSlot::new("Tabs"), AnswerSlot::new("Spaces")],
            unique_url: "/poll/tabs1234".into(),
            results_url: "/poll/tabs1234/results".into(),
            is_public,
            created_at: Utc::now(),
        }
    }

    async fn service_with(poll: &Poll) -> VoteService {
        let store = Arc::new(MemoryStore::default());
        store
            .insert(Table::Polls, serde_json::to_value(poll).unwrap())
            .await
            .unwrap();
        VoteService::new(store, Duration::from_secs(1))
    }

    /// Delegates to a memory store, stalling or failing writes on demand.
    struct FlakyStore {
        inner: MemoryStore,
        stall: Option<Duration>,
        conflict: bool,
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn get_by_key(&self, table: Table, key: Key<'_>) -> AppResult<Option<Value>> {
            self.inner.get_by_key(table, key).await
        }

        async fn insert(&self, table: Table, doc: Value) -> AppResult<Uuid> {
            self.inner.insert(table, doc).await
        }

        async fn replace(&self, table: Table, id: Uuid, doc: Value) -> AppResult<()> {
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if self.conflict {
                return Err(AppError::Conflict);
            }
            self.inner.replace(table, id, doc).await
        }

        async fn find_by_owner(&self, table: Table, owner_id: &str) -> AppResult<Vec<Value>> {
            self.inner.find_by_owner(table, owner_id).await
        }

        fn changes(&self, table: Table) -> broadcast::Receiver<ChangeEvent> {
            self.inner.changes(table)
        }
    }

    async fn flaky(poll: &Poll, stall: Option<Duration>, conflict: bool) -> VoteService {
        let inner = MemoryStore::default();
        inner
            .insert(Table::Polls, serde_json::to_value(poll).unwrap())
            .await
            .unwrap();
        let store = FlakyStore {
            inner,
            stall,
            conflict,
        };
        VoteService::new(Arc::new(store), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn vote_is_persisted() {
        let poll = poll(true);
        let service = service_with(&poll).await;

        let receipt = service.submit_vote::<Poll>(poll.id, &1).await.unwrap();
        assert_eq!(receipt.document_id, poll.id);

        let stored: Poll = service.fetch(Key::Id(poll.id)).await.unwrap();
        let counts: Vec<u64> = stored.answers.iter().map(|a| a.votes).collect();
        assert_eq!(counts, vec![0, 1]);
    }

    #[tokio::test]
    async fn receipt_links_results_only_when_public() {
        let public = poll(true);
        let service = service_with(&public).await;
        let receipt = service.submit_vote::<Poll>(public.id, &0).await.unwrap();
        assert_eq!(receipt.results_url.as_deref(), Some("/poll/tabs1234/results"));

        let private = poll(false);
        let service = service_with(&private).await;
        let receipt = service.submit_vote::<Poll>(private.id, &0).await.unwrap();
        assert_eq!(receipt.results_url, None);
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let service = service_with(&poll(true)).await;
        let err = service
            .submit_vote::<Poll>(Uuid::new_v4(), &0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn invalid_selection_writes_nothing() {
        let poll = poll(true);
        let service = service_with(&poll).await;

        let err = service.submit_vote::<Poll>(poll.id, &7).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidSelection(_)));

        let stored: Poll = service.fetch(Key::Id(poll.id)).await.unwrap();
        assert_eq!(stored, poll);
    }

    #[tokio::test]
    async fn slow_store_fails_store_unavailable() {
        let poll = poll(true);
        let service = flaky(&poll, Some(Duration::from_millis(500)), false).await;

        let err = service.submit_vote::<Poll>(poll.id, &0).await.unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn conflict_is_surfaced_not_retried() {
        let poll = poll(true);
        let service = flaky(&poll, None, true).await;

        let err = service.submit_vote::<Poll>(poll.id, &0).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict));

        let stored: Poll = service.fetch(Key::Id(poll.id)).await.unwrap();
        assert!(stored.answers.iter().all(|a| a.votes == 0));
    }
}
