// src/models.rs
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppResult, store::Table, tally};

/// One option's label and its running vote count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSlot {
    pub choice: String,
    #[serde(default)]
    pub votes: u64,
}

impl AnswerSlot {
    pub fn new(choice: impl Into<String>) -> Self {
        Self {
            choice: choice.into(),
            votes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(alias = "question")]
    pub text: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: Uuid,
    pub question: String,
    pub answers: Vec<AnswerSlot>,
    pub unique_url: String,
    pub results_url: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

/// A multi-question document. `answers[i]` holds the counts for `questions[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub id: Uuid,
    pub title: String,
    pub questions: Vec<Question>,
    pub answers: Vec<Vec<AnswerSlot>>,
    pub unique_url: String,
    pub results_url: String,
    pub is_public: bool,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Question index to selected option index, one entry per question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurveySubmission(pub BTreeMap<usize, usize>);

impl FromIterator<(usize, usize)> for SurveySubmission {
    fn from_iter<I: IntoIterator<Item = (usize, usize)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A stored record that votes can be tallied into.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: Table;

    type Submission: Send + Sync;

    fn id(&self) -> Uuid;

    fn results_url(&self) -> &str;

    fn is_public(&self) -> bool;

    /// Next state of the document with `submission` counted. Pure.
    fn tally(&self, submission: &Self::Submission) -> AppResult<Self>;
}

impl Document for Poll {
    const TABLE: Table = Table::Polls;

    type Submission = usize;

    fn id(&self) -> Uuid {
        self.id
    }

    fn results_url(&self) -> &str {
        &self.results_url
    }

    fn is_public(&self) -> bool {
        self.is_public
    }

    fn tally(&self, option: &usize) -> AppResult<Self> {
        tally::apply_poll(self, *option)
    }
}

impl Document for Survey {
    const TABLE: Table = Table::Surveys;

    type Submission = SurveySubmission;

    fn id(&self) -> Uuid {
        self.id
    }

    fn results_url(&self) -> &str {
        &self.results_url
    }

    fn is_public(&self) -> bool {
        self.is_public
    }

    fn tally(&self, submission: &SurveySubmission) -> AppResult<Self> {
        tally::apply_survey(self, submission)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub document_id: Uuid,
    /// Set only for public documents, where voters are sent on to the results.
    pub results_url: Option<String>,
}

#[derive(Deserialize)]
pub struct PollVoteRequest {
    pub option: usize,
}

#[derive(Deserialize)]
pub struct SurveyVoteRequest {
    pub selections: SurveySubmission,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_votes_default_to_zero() {
        let slot: AnswerSlot = serde_json::from_value(json!({ "choice": "Cats" })).unwrap();
        assert_eq!(slot, AnswerSlot::new("Cats"));
    }

    #[test]
    fn question_accepts_stored_field_name() {
        let q: Question =
            serde_json::from_value(json!({ "question": "Tea?", "options": ["Yes", "No"] })).unwrap();
        assert_eq!(q.text, "Tea?");
    }

    #[test]
    fn submission_reads_string_keys() {
        let sub: SurveySubmission = serde_json::from_value(json!({ "0": 1, "1": 0 })).unwrap();
        assert_eq!(sub, SurveySubmission::from_iter([(0, 1), (1, 0)]));
    }
}
