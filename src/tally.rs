// src/tally.rs
use crate::{
    error::{AppError, AppResult},
    models::{Poll, Survey, SurveySubmission},
};

/// Count one vote for `option`. Leaves `poll` untouched.
pub fn apply_poll(poll: &Poll, option: usize) -> AppResult<Poll> {
    if option >= poll.answers.len() {
        return Err(AppError::InvalidSelection(format!(
            "option {option} is out of range for {} choices",
            poll.answers.len()
        )));
    }

    let mut next = poll.clone();
    next.answers[option].votes += 1;
    Ok(next)
}

/// Count one vote per question. The submission must name every question
/// and nothing else; nothing is counted unless the whole submission is valid.
pub fn apply_survey(survey: &Survey, submission: &SurveySubmission) -> AppResult<Survey> {
    if survey.answers.len() != survey.questions.len() {
        return Err(AppError::InvalidSelection(format!(
            "survey has {} questions but {} answer lists",
            survey.questions.len(),
            survey.answers.len()
        )));
    }

    if let Some(missing) = (0..survey.questions.len()).find(|q| !submission.0.contains_key(q)) {
        return Err(AppError::InvalidSelection(format!(
            "question {missing} has no selection"
        )));
    }

    for (&question, &option) in &submission.0 {
        let Some(slots) = survey.answers.get(question) else {
            return Err(AppError::InvalidSelection(format!(
                "question {question} does not exist"
            )));
        };

        let offered = survey.questions[question].options.len();
        if option >= slots.len() || option >= offered {
            return Err(AppError::InvalidSelection(format!(
                "option {option} is out of range for question {question}"
            )));
        }
    }

    let mut next = survey.clone();
    for (&question, &option) in &submission.0 {
        next.answers[question][option].votes += 1;
    }

    Ok(next)
}
