// src/state.rs
use std::sync::Arc;

use crate::{config::Config, feed::ChangeFeed, services::VoteService, store::DocumentStore};

#[derive(Clone)]
pub struct AppState {
    pub votes: VoteService,
    pub feed: ChangeFeed,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self {
            votes: VoteService::new(store.clone(), config.store_timeout),
            feed: ChangeFeed::new(store),
        }
    }
}
