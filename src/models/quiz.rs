// src/models/quiz.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::question::{CreateQuestionRequest, Question};

/// Represents the 'quizzes' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Quiz {
    pub id: i64,
    pub name: String,
    /// Short number learners can type instead of the name.
    pub alias: i64,
    /// Default daily message quota for new subscriptions.
    pub daily_quota: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Catalog listing entry.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QuizSummary {
    pub id: i64,
    pub name: String,
    pub alias: i64,
    pub daily_quota: i64,
    pub question_count: i64,
    pub subscriber_count: i64,
}

/// A validated quiz ready to be stored.
#[derive(Debug, Clone)]
pub struct NewQuiz {
    pub name: String,
    pub daily_quota: i64,
    pub questions: Vec<Question>,
}

/// DTO for creating a quiz with its questions over HTTP.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(range(min = 0, max = 10))]
    pub daily_quota: Option<i64>,
    #[validate(length(min = 1), nested)]
    pub questions: Vec<CreateQuestionRequest>,
}

/// Query parameters for importing a QTI export.
#[derive(Debug, Deserialize, Validate)]
pub struct ImportQuizParams {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(range(min = 0, max = 10))]
    pub quota: Option<i64>,
}

/// DTO for updating a quiz. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuizRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(range(min = 0, max = 10))]
    pub daily_quota: Option<i64>,
}
