// src/handlers/quiz.rs

use axum::{Json, extract::State, response::IntoResponse};

use crate::{error::AppError, services::catalog::Catalog};

/// Lists all quizzes with their question and subscriber counts.
///
/// Public; mirrors the chat `quizzes` command.
pub async fn list_quizzes(State(catalog): State<Catalog>) -> Result<impl IntoResponse, AppError> {
    let quizzes = catalog.list().await?;
    Ok(Json(quizzes))
}
