// src/view.rs
//! Display statistics derived from a document snapshot.
//!
//! Everything here is recomputed from the snapshot alone; no running totals
//! are carried between calls.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{AnswerSlot, Poll, Survey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionStat {
    /// Position in the document's option list.
    pub index: usize,
    pub choice: String,
    pub votes: u64,
    pub percentage: u32,
    pub is_leader: bool,
}

/// Options in display order: most votes first, ties kept in option order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub total_votes: u64,
    pub per_option: Vec<OptionStat>,
}

/// `votes / total` as a whole percentage, halves rounded up.
fn percentage(votes: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    let (votes, total) = (u128::from(votes), u128::from(total));
    ((votes * 200 + total) / (total * 2)) as u32
}

pub fn derive(answers: &[AnswerSlot]) -> Tally {
    let total_votes = answers
        .iter()
        .fold(0u64, |sum, a| sum.saturating_add(a.votes));

    let mut per_option: Vec<OptionStat> = answers
        .iter()
        .enumerate()
        .map(|(index, answer)| OptionStat {
            index,
            choice: answer.choice.clone(),
            votes: answer.votes,
            percentage: percentage(answer.votes, total_votes),
            is_leader: false,
        })
        .collect();

    // sort_by is stable, so equal counts stay in option order.
    per_option.sort_by(|a, b| b.votes.cmp(&a.votes));

    if total_votes > 0 {
        if let Some(first) = per_option.first_mut() {
            first.is_leader = true;
        }
    }

    Tally {
        total_votes,
        per_option,
    }
}

pub fn elapsed_label(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - created_at).num_seconds().max(0);
    let minutes = seconds / 60;
    let hours = minutes / 60;

    if hours > 0 {
        format!("{hours}h {}m ago", minutes % 60)
    } else if minutes > 0 {
        format!("{minutes}m {}s ago", seconds % 60)
    } else {
        format!("{seconds}s ago")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollView {
    pub id: Uuid,
    pub question: String,
    pub unique_url: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub elapsed: String,
    #[serde(flatten)]
    pub tally: Tally,
}

impl PollView {
    pub fn new(poll: &Poll, now: DateTime<Utc>) -> Self {
        Self {
            id: poll.id,
            question: poll.question.clone(),
            unique_url: poll.unique_url.clone(),
            is_public: poll.is_public,
            created_at: poll.created_at,
            elapsed: elapsed_label(poll.created_at, now),
            tally: derive(&poll.answers),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionView {
    pub text: String,
    pub tally: Tally,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyView {
    pub id: Uuid,
    pub title: String,
    pub unique_url: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub elapsed: String,
    /// Across every question.
    pub total_votes: u64,
    pub questions: Vec<QuestionView>,
}

impl SurveyView {
    pub fn new(survey: &Survey, now: DateTime<Utc>) -> Self {
        let questions: Vec<QuestionView> = survey
            .questions
            .iter()
            .zip(&survey.answers)
            .map(|(question, answers)| QuestionView {
                text: question.text.clone(),
                tally: derive(answers),
            })
            .collect();

        Self {
            id: survey.id,
            title: survey.title.clone(),
            unique_url: survey.unique_url.clone(),
            is_public: survey.is_public,
            created_at: survey.created_at,
            elapsed: elapsed_label(survey.created_at, now),
            total_votes: survey_total(survey),
            questions,
        }
    }
}

fn survey_total(survey: &Survey) -> u64 {
    survey
        .answers
        .iter()
        .flatten()
        .fold(0u64, |sum, a| sum.saturating_add(a.votes))
}

/// One row of an owner's survey listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveySummary {
    pub id: Uuid,
    pub title: String,
    pub unique_url: String,
    pub results_url: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub total_votes: u64,
}

impl From<&Survey> for SurveySummary {
    fn from(survey: &Survey) -> Self {
        Self {
            id: survey.id,
            title: survey.title.clone(),
            unique_url: survey.unique_url.clone(),
            results_url: survey.results_url.clone(),
            is_public: survey.is_public,
            created_at: survey.created_at,
            total_votes: survey_total(survey),
        }
    }
}
