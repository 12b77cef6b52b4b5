// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    import::qti,
    models::quiz::{CreateQuizRequest, ImportQuizParams, NewQuiz, UpdateQuizRequest},
    services::catalog::Catalog,
};

/// Creates a quiz with its questions from JSON.
/// Admin only.
pub async fn create_quiz(
    State(catalog): State<Catalog>,
    State(config): State<Config>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::Validation(validation_errors.to_string()));
    }

    let questions = payload
        .questions
        .into_iter()
        .enumerate()
        .map(|(position, question)| question.into_question(position))
        .collect::<Result<Vec<_>, _>>()?;

    let quiz = catalog
        .create(NewQuiz {
            name: payload.name,
            daily_quota: payload.daily_quota.unwrap_or(config.default_quota),
            questions,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": quiz.id, "alias": quiz.alias })),
    ))
}

/// Imports a quiz from a QTI XML export sent as the request body.
///
/// The quiz name comes from `?name=` or, failing that, the assessment title.
/// Admin only.
pub async fn import_quiz(
    State(catalog): State<Catalog>,
    State(config): State<Config>,
    Query(params): Query<ImportQuizParams>,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = params.validate() {
        return Err(AppError::Validation(validation_errors.to_string()));
    }

    let imported = qti::parse(&body)?;

    let name = params
        .name
        .or(imported.title)
        .ok_or(AppError::Validation(
            "The export has no title; pass ?name= to name the quiz".to_string(),
        ))?;

    let quiz = catalog
        .create(NewQuiz {
            name,
            daily_quota: params.quota.unwrap_or(config.default_quota),
            questions: imported.questions,
        })
        .await?;

    tracing::info!(
        quiz_id = quiz.id,
        skipped = imported.skipped,
        "Imported quiz '{}'",
        quiz.name
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": quiz.id,
            "alias": quiz.alias,
            "skipped": imported.skipped,
        })),
    ))
}

/// Lists the questions of a quiz in delivery order, answers included.
/// Admin only.
pub async fn list_questions(
    State(catalog): State<Catalog>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let quiz = catalog.get(id).await?;
    let questions = catalog.questions_of(quiz.id).await?;
    Ok(Json(questions))
}

/// Renames a quiz or changes its default daily quota.
/// Admin only.
pub async fn update_quiz(
    State(catalog): State<Catalog>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::Validation(validation_errors.to_string()));
    }

    let quiz = catalog.update(id, payload.name, payload.daily_quota).await?;
    Ok(Json(quiz))
}

/// Deletes a quiz with its questions and all learner progress.
/// Admin only.
pub async fn delete_quiz(
    State(catalog): State<Catalog>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    catalog.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
