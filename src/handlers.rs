// src/handlers.rs
use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::AppResult,
    maker::{NewPoll, NewSurvey},
    models::{Document, Poll, PollVoteRequest, Survey, SurveyVoteRequest, VoteReceipt},
    state::AppState,
    store::Key,
    view::{PollView, SurveySummary, SurveyView},
};

fn poll_url(slug: &str) -> String {
    format!("/poll/{slug}")
}

fn poll_results_url(slug: &str) -> String {
    format!("/poll/{slug}/results")
}

fn survey_url(slug: &str) -> String {
    format!("/survey/{slug}")
}

fn survey_results_url(slug: &str) -> String {
    format!("/survey/{slug}/results")
}

/// Publish a new poll
pub async fn create_poll(
    State(state): State<AppState>,
    Json(new): Json<NewPoll>,
) -> AppResult<(StatusCode, Json<Poll>)> {
    let poll = state.votes.publish_poll(&new).await?;
    Ok((StatusCode::CREATED, Json(poll)))
}

/// Load a poll for voting
pub async fn get_poll(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<Poll>> {
    let poll = state.votes.fetch(Key::UniqueUrl(&poll_url(&slug))).await?;
    Ok(Json(poll))
}

/// Vote on a poll
pub async fn vote_poll(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(vote): Json<PollVoteRequest>,
) -> AppResult<Json<VoteReceipt>> {
    let poll: Poll = state.votes.fetch(Key::UniqueUrl(&poll_url(&slug))).await?;
    let receipt = state.votes.submit_vote::<Poll>(poll.id, &vote.option).await?;
    Ok(Json(receipt))
}

/// Current poll results
pub async fn poll_results(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<PollView>> {
    let poll: Poll = state
        .votes
        .fetch(Key::ResultsUrl(&poll_results_url(&slug)))
        .await?;
    Ok(Json(PollView::new(&poll, Utc::now())))
}

/// Live poll results over server-sent events
pub async fn poll_results_stream(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let poll: Poll = state
        .votes
        .fetch(Key::ResultsUrl(&poll_results_url(&slug)))
        .await?;
    live_results(state, poll.id, PollView::new).await
}

/// Publish a new survey
pub async fn create_survey(
    State(state): State<AppState>,
    Json(new): Json<NewSurvey>,
) -> AppResult<(StatusCode, Json<Survey>)> {
    let survey = state.votes.publish_survey(&new).await?;
    Ok((StatusCode::CREATED, Json(survey)))
}

/// Load a survey for answering
pub async fn get_survey(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<Survey>> {
    let survey = state.votes.fetch(Key::UniqueUrl(&survey_url(&slug))).await?;
    Ok(Json(survey))
}

/// Submit a full set of survey answers
pub async fn vote_survey(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(vote): Json<SurveyVoteRequest>,
) -> AppResult<Json<VoteReceipt>> {
    let survey: Survey = state.votes.fetch(Key::UniqueUrl(&survey_url(&slug))).await?;
    let receipt = state
        .votes
        .submit_vote::<Survey>(survey.id, &vote.selections)
        .await?;
    Ok(Json(receipt))
}

/// Current survey results
pub async fn survey_results(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<SurveyView>> {
    let survey: Survey = state
        .votes
        .fetch(Key::ResultsUrl(&survey_results_url(&slug)))
        .await?;
    Ok(Json(SurveyView::new(&survey, Utc::now())))
}

/// Live survey results over server-sent events
pub async fn survey_results_stream(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let survey: Survey = state
        .votes
        .fetch(Key::ResultsUrl(&survey_results_url(&slug)))
        .await?;
    live_results(state, survey.id, SurveyView::new).await
}

/// Surveys published by one identity
pub async fn owner_surveys(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> AppResult<Json<Vec<SurveySummary>>> {
    let surveys = state.votes.owned_surveys(&owner_id).await?;
    Ok(Json(surveys.iter().map(SurveySummary::from).collect()))
}

fn view_event<V: Serialize>(view: &V) -> Result<Event, Infallible> {
    Ok(Event::default()
        .event("results")
        .json_data(view)
        .unwrap_or_else(|e| {
            warn!("Failed to encode results event: {e}");
            Event::default().event("error").data("results unavailable")
        }))
}

/// Initial view, then one view per snapshot until the feed disconnects.
///
/// The subscription opens before the initial read, so a vote committed in
/// between still reaches the stream; the first update may repeat the
/// initial view. Only the newest undelivered snapshot is held for a slow
/// client. The subscription lives inside the stream and ends with it.
async fn live_results<D, V, F>(
    state: AppState,
    id: Uuid,
    render: F,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>>
where
    D: Document,
    V: Serialize,
    F: Fn(&D, DateTime<Utc>) -> V + Copy + Send + 'static,
{
    let (latest, pending) = watch::channel::<Option<AppResult<D>>>(None);
    let subscription = state.feed.subscribe::<D, _>(id, move |update| {
        latest.send_replace(Some(update));
    });
    let initial: D = state.votes.fetch(Key::Id(id)).await?;

    let first = stream::once(async move { view_event(&render(&initial, Utc::now())) });

    let updates = stream::unfold(Some((pending, subscription)), move |live| async move {
        let Some((mut pending, subscription)) = live else {
            return None;
        };
        if pending.changed().await.is_err() {
            return None;
        }
        let update = pending.borrow_and_update().clone();
        match update {
            Some(Ok(snapshot)) => Some((
                view_event(&render(&snapshot, Utc::now())),
                Some((pending, subscription)),
            )),
            Some(Err(e)) => Some((
                Ok(Event::default().event("disconnected").data(e.to_string())),
                None,
            )),
            None => None,
        }
    });

    Ok(Sse::new(first.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
