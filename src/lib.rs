// src/lib.rs
//! Polls and surveys with live-updating tallies.
//!
//! A vote is a read-modify-write of one whole document: [`services::VoteService`]
//! reads the latest document, [`tally`] counts the submission, and the store
//! replaces the document. Every replace is published on the store's change
//! feed, [`feed::ChangeFeed`] hands snapshots of one document to its
//! subscribers, and [`view`] derives the percentages and leader shown to
//! viewers.

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod handlers;
pub mod maker;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod tally;
pub mod view;
