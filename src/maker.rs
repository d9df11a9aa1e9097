// src/maker.rs
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{AnswerSlot, Document, Poll, Question, Survey},
    services::VoteService,
};

const SLUG_LEN: usize = 8;
const SLUG_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const PUBLISH_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct NewPoll {
    pub question: String,
    pub choices: Vec<String>,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewQuestion {
    pub text: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSurvey {
    pub title: String,
    pub questions: Vec<NewQuestion>,
    #[serde(default)]
    pub is_public: bool,
    /// Opaque identity reference from the identity provider, echoed as-is.
    #[serde(default)]
    pub owner_id: Option<String>,
}

pub fn generate_slug() -> String {
    let mut rng = rand::thread_rng();
    (0..SLUG_LEN)
        .map(|_| SLUG_CHARSET[rng.gen_range(0..SLUG_CHARSET.len())] as char)
        .collect()
}

fn required(text: &str, what: &str) -> AppResult<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{what} must not be blank")));
    }
    Ok(trimmed.to_owned())
}

/// Trimmed non-blank options; at least two are required.
fn options(raw: &[String], what: &str) -> AppResult<Vec<String>> {
    let kept: Vec<String> = raw
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .map(str::to_owned)
        .collect();

    if kept.len() < 2 {
        return Err(AppError::Validation(format!(
            "{what} needs at least 2 choices"
        )));
    }
    Ok(kept)
}

pub fn build_poll(new: &NewPoll, slug: &str, now: DateTime<Utc>) -> AppResult<Poll> {
    let question = required(&new.question, "question")?;
    let choices = options(&new.choices, "poll")?;
    let unique_url = format!("/poll/{slug}");

    Ok(Poll {
        id: Uuid::new_v4(),
        question,
        answers: choices.into_iter().map(AnswerSlot::new).collect(),
        results_url: format!("{unique_url}/results"),
        unique_url,
        is_public: new.is_public,
        created_at: now,
    })
}

pub fn build_survey(new: &NewSurvey, slug: &str, now: DateTime<Utc>) -> AppResult<Survey> {
    let title = required(&new.title, "title")?;
    if new.questions.is_empty() {
        return Err(AppError::Validation(
            "survey needs at least one question".to_string(),
        ));
    }

    let questions = new
        .questions
        .iter()
        .enumerate()
        .map(|(i, q)| -> AppResult<Question> {
            Ok(Question {
                text: required(&q.text, &format!("question {}", i + 1))?,
                options: options(&q.options, &format!("question {}", i + 1))?,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    let answers = questions
        .iter()
        .map(|q| q.options.iter().map(AnswerSlot::new).collect())
        .collect();
    let unique_url = format!("/survey/{slug}");

    Ok(Survey {
        id: Uuid::new_v4(),
        title,
        questions,
        answers,
        results_url: format!("{unique_url}/results"),
        unique_url,
        is_public: new.is_public,
        owner_id: new.owner_id.clone(),
        created_at: now,
    })
}

impl VoteService {
    pub async fn publish_poll(&self, new: &NewPoll) -> AppResult<Poll> {
        self.publish(|slug| build_poll(new, slug, Utc::now())).await
    }

    pub async fn publish_survey(&self, new: &NewSurvey) -> AppResult<Survey> {
        self.publish(|slug| build_survey(new, slug, Utc::now())).await
    }

    /// Insert a freshly built document, drawing a new slug when the store
    /// reports a url collision.
    async fn publish<D, F>(&self, build: F) -> AppResult<D>
    where
        D: Document,
        F: Fn(&str) -> AppResult<D>,
    {
        for attempt in 1..=PUBLISH_ATTEMPTS {
            let doc = build(&generate_slug())?;
            let value = serde_json::to_value(&doc)?;

            match self.within(self.store().insert(D::TABLE, value)).await {
                Ok(id) => {
                    info!("Published {id} to {}", D::TABLE.name());
                    return Ok(doc);
                }
                Err(AppError::Conflict) => {
                    warn!("Slug collision in {} (attempt {attempt})", D::TABLE.name());
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::store::{Key, MemoryStore};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn slugs_are_short_lowercase_alphanumerics() {
        let slug = generate_slug();
        assert_eq!(slug.len(), SLUG_LEN);
        assert!(slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn poll_is_trimmed_and_zeroed() {
        let new = NewPoll {
            question: "  Cats or dogs? ".into(),
            choices: strings(&[" Cats", "", "Dogs ", "   "]),
            is_public: true,
        };

        let poll = build_poll(&new, "abc12345", Utc::now()).unwrap();

        assert_eq!(poll.question, "Cats or dogs?");
        assert_eq!(poll.answers, vec![AnswerSlot::new("Cats"), AnswerSlot::new("Dogs")]);
        assert_eq!(poll.unique_url, "/poll/abc12345");
        assert_eq!(poll.results_url, "/poll/abc12345/results");
    }

    #[test]
    fn poll_needs_question_and_two_choices() {
        let blank = NewPoll {
            question: "   ".into(),
            choices: strings(&["a", "b"]),
            is_public: false,
        };
        assert!(matches!(
            build_poll(&blank, "s", Utc::now()),
            Err(AppError::Validation(_))
        ));

        let lonely = NewPoll {
            question: "Q".into(),
            choices: strings(&["a", " "]),
            is_public: false,
        };
        assert!(matches!(
            build_poll(&lonely, "s", Utc::now()),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn survey_answers_mirror_questions() {
        let new = NewSurvey {
            title: "Lunch".into(),
            questions: vec![
                NewQuestion {
                    text: "Main?".into(),
                    options: strings(&["Soup", "Salad", "Stew"]),
                },
                NewQuestion {
                    text: "Drink?".into(),
                    options: strings(&["Tea", "", "Coffee"]),
                },
            ],
            is_public: false,
            owner_id: Some("user-1".into()),
        };

        let survey = build_survey(&new, "xyz", Utc::now()).unwrap();

        assert_eq!(survey.answers.len(), survey.questions.len());
        for (question, slots) in survey.questions.iter().zip(&survey.answers) {
            assert_eq!(question.options.len(), slots.len());
            assert!(slots.iter().all(|s| s.votes == 0));
        }
        assert_eq!(survey.questions[1].options, strings(&["Tea", "Coffee"]));
        assert_eq!(survey.owner_id.as_deref(), Some("user-1"));
        assert_eq!(survey.results_url, "/survey/xyz/results");
    }

    #[test]
    fn survey_rejects_any_bad_question() {
        let new = NewSurvey {
            title: "T".into(),
            questions: vec![
                NewQuestion {
                    text: "ok".into(),
                    options: strings(&["a", "b"]),
                },
                NewQuestion {
                    text: "".into(),
                    options: strings(&["a", "b"]),
                },
            ],
            is_public: true,
            owner_id: None,
        };
        assert!(build_survey(&new, "s", Utc::now()).is_err());

        let empty = NewSurvey {
            questions: Vec::new(),
            ..new
        };
        assert!(build_survey(&empty, "s", Utc::now()).is_err());
    }

    #[tokio::test]
    async fn published_poll_is_readable_by_both_urls() {
        let service = VoteService::new(Arc::new(MemoryStore::default()), Duration::from_secs(1));
        let new = NewPoll {
            question: "Q".into(),
            choices: strings(&["a", "b"]),
            is_public: true,
        };

        let poll = service.publish_poll(&new).await.unwrap();

        let by_vote: Poll = service.fetch(Key::UniqueUrl(&poll.unique_url)).await.unwrap();
        let by_results: Poll = service.fetch(Key::ResultsUrl(&poll.results_url)).await.unwrap();
        assert_eq!(by_vote, poll);
        assert_eq!(by_results, poll);
    }

    #[tokio::test]
    async fn slug_collision_draws_a_new_slug() {
        let service = VoteService::new(Arc::new(MemoryStore::default()), Duration::from_secs(1));
        let new = NewPoll {
            question: "Q".into(),
            choices: strings(&["a", "b"]),
            is_public: true,
        };
        let taken = service
            .publish(|_| build_poll(&new, "taken", Utc::now()))
            .await
            .unwrap();

        let slugs = std::sync::Mutex::new(["taken", "fresh"].into_iter());
        let poll = service
            .publish(|_| {
                let slug = slugs.lock().unwrap().next().unwrap();
                build_poll(&new, slug, Utc::now())
            })
            .await
            .unwrap();

        assert_eq!(taken.unique_url, "/poll/taken");
        assert_eq!(poll.unique_url, "/poll/fresh");
    }
}
