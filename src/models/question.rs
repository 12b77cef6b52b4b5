// src/models/question.rs

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

use crate::error::AppError;

/// Closed set of supported question kinds. Decides the grading strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    MultipleCorrect,
    TrueFalse,
    Essay,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::MultipleChoice => "multiple_choice",
            QuestionKind::MultipleCorrect => "multiple_correct",
            QuestionKind::TrueFalse => "true_false",
            QuestionKind::Essay => "essay",
        }
    }

    /// Maps the item titles used by QTI exports.
    pub fn from_qti_title(title: &str) -> Option<Self> {
        match title.trim().to_lowercase().as_str() {
            "multiple choice" => Some(QuestionKind::MultipleChoice),
            "multiple correct" => Some(QuestionKind::MultipleCorrect),
            "true - false" => Some(QuestionKind::TrueFalse),
            "essay question" => Some(QuestionKind::Essay),
            _ => None,
        }
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multiple_choice" => Ok(QuestionKind::MultipleChoice),
            "multiple_correct" => Ok(QuestionKind::MultipleCorrect),
            "true_false" => Ok(QuestionKind::TrueFalse),
            "essay" => Ok(QuestionKind::Essay),
            other => Err(AppError::Validation(format!(
                "Unsupported question kind '{}'",
                other
            ))),
        }
    }
}

/// Outcome tag a feedback text is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackTag {
    Correct,
    Incorrect,
    Generic,
    ModelAnswer,
}

impl FeedbackTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackTag::Correct => "correct",
            FeedbackTag::Incorrect => "incorrect",
            FeedbackTag::Generic => "generic",
            FeedbackTag::ModelAnswer => "model_answer",
        }
    }
}

impl FromStr for FeedbackTag {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "correct" => Ok(FeedbackTag::Correct),
            "incorrect" => Ok(FeedbackTag::Incorrect),
            "generic" => Ok(FeedbackTag::Generic),
            "model_answer" => Ok(FeedbackTag::ModelAnswer),
            other => Err(AppError::Validation(format!(
                "Unsupported feedback tag '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Short identifier the learner types, e.g. "A".
    pub ident: String,
    pub text: String,
    pub is_correct: bool,
}

impl Answer {
    pub fn new(ident: impl Into<String>, text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            ident: ident.into(),
            text: text.into(),
            is_correct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub tag: FeedbackTag,
    pub text: String,
}

impl Feedback {
    pub fn new(tag: FeedbackTag, text: impl Into<String>) -> Self {
        Self {
            tag,
            text: text.into(),
        }
    }
}

/// A question together with its answers and feedback.
///
/// `id` is 0 until the question has been stored by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,
    /// Identifier from the source export.
    pub ident: String,
    pub kind: QuestionKind,
    pub prompt: String,
    pub answers: Vec<Answer>,
    pub feedback: Vec<Feedback>,
}

impl Question {
    /// Builds a question, enforcing the answer-count rules of its kind.
    pub fn new(
        ident: impl Into<String>,
        kind: QuestionKind,
        prompt: impl Into<String>,
        answers: Vec<Answer>,
        feedback: Vec<Feedback>,
    ) -> Result<Self, AppError> {
        let ident = ident.into();
        let prompt = prompt.into();

        if prompt.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Question '{}' has no text",
                ident
            )));
        }

        let correct = answers.iter().filter(|a| a.is_correct).count();
        match kind {
            QuestionKind::MultipleChoice | QuestionKind::MultipleCorrect if answers.len() < 2 => {
                return Err(AppError::Validation(format!(
                    "Question '{}' ({}) needs at least 2 answers, found {}",
                    ident,
                    kind,
                    answers.len()
                )));
            }
            QuestionKind::TrueFalse if answers.len() != 2 => {
                return Err(AppError::Validation(format!(
                    "Question '{}' (true_false) needs exactly 2 answers, found {}",
                    ident,
                    answers.len()
                )));
            }
            QuestionKind::MultipleChoice | QuestionKind::TrueFalse if correct != 1 => {
                return Err(AppError::Validation(format!(
                    "Question '{}' ({}) needs exactly 1 correct answer, found {}",
                    ident, kind, correct
                )));
            }
            QuestionKind::MultipleCorrect if correct == 0 => {
                return Err(AppError::Validation(format!(
                    "Question '{}' (multiple_correct) has no correct answer",
                    ident
                )));
            }
            QuestionKind::Essay if !answers.is_empty() => {
                return Err(AppError::Validation(format!(
                    "Essay question '{}' cannot have answers",
                    ident
                )));
            }
            QuestionKind::Essay
                if !feedback.iter().any(|f| f.tag == FeedbackTag::ModelAnswer) =>
            {
                return Err(AppError::Validation(format!(
                    "Essay question '{}' needs a model answer",
                    ident
                )));
            }
            _ => {}
        }

        if let Some(empty) = answers
            .iter()
            .find(|a| a.text.trim().is_empty() || a.ident.trim().is_empty())
        {
            return Err(AppError::Validation(format!(
                "Question '{}' has an answer without text or identifier ('{}')",
                ident, empty.ident
            )));
        }

        Ok(Self {
            id: 0,
            quiz_id: 0,
            ident,
            kind,
            prompt,
            answers,
            feedback,
        })
    }

    pub fn feedback_for(&self, tag: FeedbackTag) -> Option<&str> {
        self.feedback
            .iter()
            .find(|f| f.tag == tag)
            .map(|f| f.text.as_str())
    }

    /// Chat rendering: the prompt followed by one `ident) text` line per answer.
    pub fn render(&self) -> String {
        let mut out = format!("{}\n", self.prompt);
        for answer in &self.answers {
            out.push_str(&format!("{}) {}\n", answer.ident, answer.text));
        }
        out
    }
}

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct QuestionRow {
    pub id: i64,
    pub quiz_id: i64,
    pub position: i64,
    pub ident: String,
    pub kind: String,
    pub prompt: String,
}

/// Represents the 'answers' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct AnswerRow {
    pub question_id: i64,
    pub ident: String,
    pub text: String,
    pub is_correct: bool,
}

/// Represents the 'feedback' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct FeedbackRow {
    pub question_id: i64,
    pub tag: String,
    pub text: String,
}

/// DTO for one answer of a question created over HTTP.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateAnswerRequest {
    #[validate(length(min = 1, max = 10))]
    pub ident: String,
    #[validate(length(min = 1, max = 500))]
    pub text: String,
    #[serde(default)]
    pub correct: bool,
}

/// DTO for one feedback entry of a question created over HTTP.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateFeedbackRequest {
    pub tag: FeedbackTag,
    #[validate(length(min = 1, max = 2000))]
    pub text: String,
}

/// DTO for creating a question as part of a quiz.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[validate(length(max = 100))]
    pub ident: Option<String>,
    pub kind: QuestionKind,
    #[validate(length(min = 1, max = 2000))]
    pub prompt: String,
    #[serde(default)]
    #[validate(nested)]
    pub answers: Vec<CreateAnswerRequest>,
    #[serde(default)]
    #[validate(nested)]
    pub feedback: Vec<CreateFeedbackRequest>,
}

impl CreateQuestionRequest {
    pub fn into_question(self, position: usize) -> Result<Question, AppError> {
        let ident = self
            .ident
            .unwrap_or_else(|| format!("Q{}", position + 1));
        let answers = self
            .answers
            .into_iter()
            .map(|a| Answer::new(a.ident.trim().to_uppercase(), a.text, a.correct))
            .collect();
        let feedback = self
            .feedback
            .into_iter()
            .map(|f| Feedback::new(f.tag, f.text))
            .collect();
        Question::new(ident, self.kind, self.prompt, answers, feedback)
    }
}
