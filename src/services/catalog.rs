// src/services/catalog.rs

use std::collections::HashMap;

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::{
    config::MAX_DAILY_QUOTA,
    db::BEGIN_WRITE,
    error::{AppError, is_unique_violation},
    models::{
        question::{AnswerRow, Feedback, FeedbackRow, Question, QuestionRow},
        quiz::{NewQuiz, Quiz, QuizSummary},
    },
    services::progress::out_of_range,
};

/// Message returned whenever a chat reference does not resolve to a quiz.
pub const QUIZ_NOT_FOUND: &str = "This Quiz does not exist.";

/// Quiz catalog: quizzes with their questions, answers and feedback.
#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Resolves a chat reference to a quiz.
    ///
    /// Tries the name first (trimmed, case-insensitive), then the numeric alias.
    pub async fn lookup(&self, name_or_alias: &str) -> Result<Quiz, AppError> {
        let key = name_or_alias.trim();
        if key.is_empty() {
            return Err(AppError::NotFound(QUIZ_NOT_FOUND.to_string()));
        }

        let by_name = sqlx::query_as::<_, Quiz>(
            "SELECT id, name, alias, daily_quota, created_at FROM quizzes WHERE name_key = ?1",
        )
        .bind(name_key(key))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(quiz) = by_name {
            return Ok(quiz);
        }

        let Ok(alias) = key.parse::<i64>() else {
            return Err(AppError::NotFound(QUIZ_NOT_FOUND.to_string()));
        };

        sqlx::query_as::<_, Quiz>(
            "SELECT id, name, alias, daily_quota, created_at FROM quizzes WHERE alias = ?1",
        )
        .bind(alias)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound(QUIZ_NOT_FOUND.to_string()))
    }

    pub async fn get(&self, quiz_id: i64) -> Result<Quiz, AppError> {
        sqlx::query_as::<_, Quiz>(
            "SELECT id, name, alias, daily_quota, created_at FROM quizzes WHERE id = ?1",
        )
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound(QUIZ_NOT_FOUND.to_string()))
    }

    /// Lists all quizzes ordered by alias.
    pub async fn list(&self) -> Result<Vec<QuizSummary>, AppError> {
        let quizzes = sqlx::query_as::<_, QuizSummary>(
            r#"
            SELECT
                q.id,
                q.name,
                q.alias,
                q.daily_quota,
                (SELECT COUNT(*) FROM questions WHERE quiz_id = q.id) AS question_count,
                (SELECT COUNT(*) FROM subscriptions WHERE quiz_id = q.id) AS subscriber_count
            FROM quizzes q
            ORDER BY q.alias
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list quizzes: {:?}", e);
            AppError::from(e)
        })?;

        Ok(quizzes)
    }

    /// Questions of a quiz in import order.
    pub async fn questions_of(&self, quiz_id: i64) -> Result<Vec<Question>, AppError> {
        let rows = sqlx::query_as::<_, QuestionRow>(
            "SELECT id, quiz_id, position, ident, kind, prompt FROM questions WHERE quiz_id = ?1 ORDER BY position",
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;

        let answers = sqlx::query_as::<_, AnswerRow>(
            r#"
            SELECT a.question_id, a.ident, a.text, a.is_correct
            FROM answers a
            JOIN questions q ON q.id = a.question_id
            WHERE q.quiz_id = ?1
            ORDER BY a.question_id, a.position
            "#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;

        let feedback = sqlx::query_as::<_, FeedbackRow>(
            r#"
            SELECT f.question_id, f.tag, f.text
            FROM feedback f
            JOIN questions q ON q.id = f.question_id
            WHERE q.quiz_id = ?1
            ORDER BY f.id
            "#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;

        assemble(rows, answers, feedback)
    }

    pub async fn question(&self, question_id: i64) -> Result<Question, AppError> {
        let row = sqlx::query_as::<_, QuestionRow>(
            "SELECT id, quiz_id, position, ident, kind, prompt FROM questions WHERE id = ?1",
        )
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("Question not found".to_string()))?;

        let answers = sqlx::query_as::<_, AnswerRow>(
            "SELECT question_id, ident, text, is_correct FROM answers WHERE question_id = ?1 ORDER BY position",
        )
        .bind(question_id)
        .fetch_all(&self.pool)
        .await?;

        let feedback = sqlx::query_as::<_, FeedbackRow>(
            "SELECT question_id, tag, text FROM feedback WHERE question_id = ?1 ORDER BY id",
        )
        .bind(question_id)
        .fetch_all(&self.pool)
        .await?;

        assemble(vec![row], answers, feedback)?
            .pop()
            .ok_or(AppError::NotFound("Question not found".to_string()))
    }

    /// Stores a quiz with all its questions in one transaction.
    pub async fn create(&self, quiz: NewQuiz) -> Result<Quiz, AppError> {
        let name = quiz.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("Quiz name must not be empty".to_string()));
        }
        check_quota(quiz.daily_quota)?;
        if quiz.questions.is_empty() {
            return Err(AppError::Validation(format!(
                "Quiz '{}' has no questions",
                name
            )));
        }

        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        let alias = next_free_alias(&mut tx).await?;

        let quiz_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO quizzes (name, name_key, alias, daily_quota, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id
            "#,
        )
        .bind(&name)
        .bind(name_key(&name))
        .bind(alias)
        .bind(quiz.daily_quota)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("A quiz named '{}' already exists", name))
            } else {
                tracing::error!("Failed to create quiz: {:?}", e);
                AppError::from(e)
            }
        })?;

        for (position, question) in quiz.questions.iter().enumerate() {
            let question_id = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO questions (quiz_id, position, ident, kind, prompt)
                VALUES (?1, ?2, ?3, ?4, ?5)
                RETURNING id
                "#,
            )
            .bind(quiz_id)
            .bind(position as i64)
            .bind(&question.ident)
            .bind(question.kind.as_str())
            .bind(&question.prompt)
            .fetch_one(&mut *tx)
            .await?;

            for (answer_position, answer) in question.answers.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO answers (question_id, position, ident, text, is_correct)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                )
                .bind(question_id)
                .bind(answer_position as i64)
                .bind(&answer.ident)
                .bind(&answer.text)
                .bind(answer.is_correct)
                .execute(&mut *tx)
                .await?;
            }

            for feedback in &question.feedback {
                // A repeated tag replaces the earlier text.
                sqlx::query(
                    r#"
                    INSERT INTO feedback (question_id, tag, text)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(question_id, tag) DO UPDATE SET text = excluded.text
                    "#,
                )
                .bind(question_id)
                .bind(feedback.tag.as_str())
                .bind(&feedback.text)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        tracing::info!(
            quiz_id,
            alias,
            questions = quiz.questions.len(),
            "Created quiz '{}'",
            name
        );

        self.get(quiz_id).await
    }

    /// Deletes a quiz. Questions, subscriptions and progress go with it.
    pub async fn delete(&self, quiz_id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM quizzes WHERE id = ?1")
            .bind(quiz_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to delete quiz: {:?}", e);
                AppError::from(e)
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(QUIZ_NOT_FOUND.to_string()));
        }

        tracing::info!(quiz_id, "Deleted quiz");
        Ok(())
    }

    /// Renames a quiz and/or changes its default daily quota.
    pub async fn update(
        &self,
        quiz_id: i64,
        name: Option<String>,
        daily_quota: Option<i64>,
    ) -> Result<Quiz, AppError> {
        let current = self.get(quiz_id).await?;

        let name = match name {
            Some(n) if n.trim().is_empty() => {
                return Err(AppError::Validation("Quiz name must not be empty".to_string()));
            }
            Some(n) => n.trim().to_string(),
            None => current.name,
        };
        let daily_quota = daily_quota.unwrap_or(current.daily_quota);
        check_quota(daily_quota)?;

        sqlx::query("UPDATE quizzes SET name = ?1, name_key = ?2, daily_quota = ?3 WHERE id = ?4")
            .bind(&name)
            .bind(name_key(&name))
            .bind(daily_quota)
            .bind(quiz_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict(format!("A quiz named '{}' already exists", name))
                } else {
                    tracing::error!("Failed to update quiz: {:?}", e);
                    AppError::from(e)
                }
            })?;

        self.get(quiz_id).await
    }
}

/// Case-insensitive lookup key for a quiz name. Folds non-ASCII letters too.
fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn check_quota(quota: i64) -> Result<(), AppError> {
    if (0..=MAX_DAILY_QUOTA).contains(&quota) {
        Ok(())
    } else {
        Err(out_of_range(&quota.to_string()))
    }
}

/// Smallest positive alias not taken by another quiz.
async fn next_free_alias(tx: &mut Transaction<'_, Sqlite>) -> Result<i64, AppError> {
    let taken = sqlx::query_scalar::<_, i64>("SELECT alias FROM quizzes ORDER BY alias")
        .fetch_all(&mut **tx)
        .await?;

    let mut candidate = 1;
    for alias in taken {
        if alias == candidate {
            candidate += 1;
        } else if alias > candidate {
            break;
        }
    }
    Ok(candidate)
}

/// Groups answer and feedback rows under their questions, keeping row order.
fn assemble(
    rows: Vec<QuestionRow>,
    answers: Vec<AnswerRow>,
    feedback: Vec<FeedbackRow>,
) -> Result<Vec<Question>, AppError> {
    let mut answers_by_question: HashMap<i64, Vec<_>> = HashMap::new();
    for a in answers {
        answers_by_question
            .entry(a.question_id)
            .or_default()
            .push(crate::models::question::Answer::new(a.ident, a.text, a.is_correct));
    }

    let mut feedback_by_question: HashMap<i64, Vec<Feedback>> = HashMap::new();
    for f in feedback {
        let tag = f
            .tag
            .parse()
            .map_err(|e: AppError| AppError::Storage(e.to_string()))?;
        feedback_by_question
            .entry(f.question_id)
            .or_default()
            .push(Feedback::new(tag, f.text));
    }

    rows.into_iter()
        .map(|row| {
            let kind = row
                .kind
                .parse()
                .map_err(|e: AppError| AppError::Storage(e.to_string()))?;
            Ok(Question {
                id: row.id,
                quiz_id: row.quiz_id,
                ident: row.ident,
                kind,
                prompt: row.prompt,
                answers: answers_by_question.remove(&row.id).unwrap_or_default(),
                feedback: feedback_by_question.remove(&row.id).unwrap_or_default(),
            })
        })
        .collect()
}
