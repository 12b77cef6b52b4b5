// src/services/progress.rs

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    config::MAX_DAILY_QUOTA,
    db::BEGIN_WRITE,
    error::{AppError, is_unique_violation},
    models::{
        progress::{NextQuestion, OpenQuestion, SubscribedQuiz, Subscription, SubscriptionStatus},
        quiz::Quiz,
    },
    services::{catalog::Catalog, matcher},
};

/// Per-learner async locks. Serializes "check open question, then open one".
///
/// Entries nobody holds or waits for are dropped on the next acquire.
#[derive(Clone, Default)]
struct LearnerLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl LearnerLocks {
    async fn acquire(&self, learner: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(learner.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Per-learner, per-quiz progress: subscriptions, asked history and the open
/// question.
///
/// An open-question record exists per (learner, quiz) and is overwritten by
/// the next delivery. At most one of them is unanswered per (learner, room),
/// which the database also enforces with a partial unique index.
#[derive(Clone)]
pub struct ProgressTracker {
    pool: SqlitePool,
    catalog: Catalog,
    locks: LearnerLocks,
}

impl ProgressTracker {
    pub fn new(pool: SqlitePool, catalog: Catalog) -> Self {
        Self {
            pool,
            catalog,
            locks: LearnerLocks::default(),
        }
    }

    /// Subscribes a learner to a quiz, delivering to `room`.
    pub async fn subscribe(
        &self,
        learner: &str,
        quiz: &Quiz,
        room: &str,
    ) -> Result<Subscription, AppError> {
        let _guard = self.locks.acquire(learner).await;
        let now = Utc::now();

        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        sqlx::query("INSERT INTO learners (id, created_at) VALUES (?1, ?2) ON CONFLICT(id) DO NOTHING")
            .bind(learner)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (learner_id, quiz_id, room_id, daily_quota, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id, learner_id, quiz_id, room_id, daily_quota, created_at
            "#,
        )
        .bind(learner)
        .bind(quiz.id)
        .bind(room)
        .bind(quiz.daily_quota)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("You are already subscribed to {}.", quiz.name))
            } else if matches!(&e, sqlx::Error::Database(db) if db.is_foreign_key_violation()) {
                AppError::NotFound(crate::services::catalog::QUIZ_NOT_FOUND.to_string())
            } else {
                tracing::error!("Failed to subscribe: {:?}", e);
                AppError::from(e)
            }
        })?;

        tx.commit().await?;

        tracing::info!(learner, quiz_id = quiz.id, room, "Learner subscribed");
        Ok(subscription)
    }

    /// Removes the subscription and clears the learner's progress in the quiz.
    pub async fn unsubscribe(&self, learner: &str, quiz: &Quiz) -> Result<(), AppError> {
        let _guard = self.locks.acquire(learner).await;

        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;
        let removed = remove_subscription(&mut tx, learner, quiz.id).await?;
        if !removed {
            return Err(not_subscribed(quiz));
        }
        tx.commit().await?;

        tracing::info!(learner, quiz_id = quiz.id, "Learner unsubscribed");
        Ok(())
    }

    /// Clears asked history and open question, keeping the subscription.
    pub async fn reset(&self, learner: &str, quiz: &Quiz) -> Result<(), AppError> {
        let _guard = self.locks.acquire(learner).await;

        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;
        if find_subscription(&mut tx, learner, quiz.id).await?.is_none() {
            return Err(not_subscribed(quiz));
        }
        clear_progress(&mut tx, learner, quiz.id).await?;
        tx.commit().await?;

        tracing::info!(learner, quiz_id = quiz.id, "Learner progress reset");
        Ok(())
    }

    /// Opens the next unasked question of `quiz` for the learner.
    ///
    /// Fails with `Conflict` while an unanswered question is open in the quiz
    /// or in `room`. When nothing is left the learner is unsubscribed.
    pub async fn next_question(
        &self,
        learner: &str,
        quiz: &Quiz,
        room: &str,
    ) -> Result<NextQuestion, AppError> {
        let _guard = self.locks.acquire(learner).await;

        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        if find_subscription(&mut tx, learner, quiz.id).await?.is_none() {
            return Err(not_subscribed(quiz));
        }

        let open = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM open_questions
            WHERE learner_id = ?1 AND answered = 0 AND (quiz_id = ?2 OR room_id = ?3)
            "#,
        )
        .bind(learner)
        .bind(quiz.id)
        .bind(room)
        .fetch_one(&mut *tx)
        .await?;

        if open > 0 {
            return Err(AppError::Conflict(
                "You still have an open question. Please answer it first.".to_string(),
            ));
        }

        let next_id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT q.id FROM questions q
            WHERE q.quiz_id = ?1
              AND NOT EXISTS (
                  SELECT 1 FROM asked_history h
                  WHERE h.learner_id = ?2 AND h.question_id = q.id
              )
            ORDER BY q.position
            LIMIT 1
            "#,
        )
        .bind(quiz.id)
        .bind(learner)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(question_id) = next_id else {
            remove_subscription(&mut tx, learner, quiz.id).await?;
            tx.commit().await?;
            tracing::info!(learner, quiz_id = quiz.id, "No questions left, learner unsubscribed");
            return Ok(NextQuestion::Completed {
                quiz_name: quiz.name.clone(),
            });
        };

        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO open_questions (learner_id, quiz_id, question_id, room_id, answered, asked_at, answered_at)
            VALUES (?1, ?2, ?3, ?4, 0, ?5, NULL)
            ON CONFLICT(learner_id, quiz_id) DO UPDATE SET
                question_id = excluded.question_id,
                room_id = excluded.room_id,
                answered = 0,
                asked_at = excluded.asked_at,
                answered_at = NULL
            "#,
        )
        .bind(learner)
        .bind(quiz.id)
        .bind(question_id)
        .bind(room)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(
                    "You still have an open question. Please answer it first.".to_string(),
                )
            } else {
                AppError::from(e)
            }
        })?;

        sqlx::query(
            r#"
            INSERT INTO asked_history (learner_id, question_id, quiz_id, asked_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(learner_id, question_id) DO NOTHING
            "#,
        )
        .bind(learner)
        .bind(question_id)
        .bind(quiz.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(learner, quiz_id = quiz.id, question_id, room, "Question delivered");
        Ok(NextQuestion::Delivered(self.catalog.question(question_id).await?))
    }

    /// Unanswered question open in `room`, if any.
    pub async fn open_question(
        &self,
        learner: &str,
        room: &str,
    ) -> Result<Option<OpenQuestion>, AppError> {
        let open = sqlx::query_as::<_, OpenQuestion>(
            r#"
            SELECT learner_id, quiz_id, question_id, room_id, answered, asked_at, answered_at
            FROM open_questions
            WHERE learner_id = ?1 AND room_id = ?2 AND answered = 0
            "#,
        )
        .bind(learner)
        .bind(room)
        .fetch_optional(&self.pool)
        .await?;

        Ok(open)
    }

    /// Open-question record of a quiz, answered or not.
    pub async fn open_question_in_quiz(
        &self,
        learner: &str,
        quiz_id: i64,
    ) -> Result<Option<OpenQuestion>, AppError> {
        let open = sqlx::query_as::<_, OpenQuestion>(
            r#"
            SELECT learner_id, quiz_id, question_id, room_id, answered, asked_at, answered_at
            FROM open_questions
            WHERE learner_id = ?1 AND quiz_id = ?2
            "#,
        )
        .bind(learner)
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(open)
    }

    /// Grades the open question of `room` and returns the reply text.
    ///
    /// Once every question of the quiz has been asked the learner is
    /// unsubscribed and a completion message is appended.
    pub async fn submit_answer(
        &self,
        learner: &str,
        room: &str,
        text: &str,
    ) -> Result<String, AppError> {
        let _guard = self.locks.acquire(learner).await;

        let open = self
            .open_question(learner, room)
            .await?
            .ok_or(AppError::NotFound(
                "There is no open question to answer.".to_string(),
            ))?;

        let question = self.catalog.question(open.question_id).await?;
        let grade = matcher::grade(&question, text);

        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        sqlx::query(
            r#"
            UPDATE open_questions SET answered = 1, answered_at = ?1
            WHERE learner_id = ?2 AND quiz_id = ?3 AND answered = 0
            "#,
        )
        .bind(Utc::now())
        .bind(learner)
        .bind(open.quiz_id)
        .execute(&mut *tx)
        .await?;

        let (asked, total) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM asked_history WHERE learner_id = ?1 AND quiz_id = ?2),
                (SELECT COUNT(*) FROM questions WHERE quiz_id = ?2)
            "#,
        )
        .bind(learner)
        .bind(open.quiz_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut reply = grade.reply;

        if asked >= total {
            remove_subscription(&mut tx, learner, open.quiz_id).await?;
            let quiz_name = sqlx::query_scalar::<_, String>("SELECT name FROM quizzes WHERE id = ?1")
                .bind(open.quiz_id)
                .fetch_one(&mut *tx)
                .await?;
            reply.push_str(&format!("\n\n{}", completion_message(&quiz_name)));
            tracing::info!(learner, quiz_id = open.quiz_id, "Quiz completed, learner unsubscribed");
        }

        tx.commit().await?;

        tracing::debug!(
            learner,
            quiz_id = open.quiz_id,
            question_id = open.question_id,
            classification = ?grade.classification,
            "Answer graded"
        );
        Ok(reply)
    }

    /// Changes the learner's own daily quota for a quiz.
    pub async fn set_quota(&self, learner: &str, quiz: &Quiz, quota: i64) -> Result<(), AppError> {
        if !(0..=MAX_DAILY_QUOTA).contains(&quota) {
            return Err(out_of_range(&quota.to_string()));
        }

        let result = sqlx::query(
            "UPDATE subscriptions SET daily_quota = ?1 WHERE learner_id = ?2 AND quiz_id = ?3",
        )
        .bind(quota)
        .bind(learner)
        .bind(quiz.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_subscribed(quiz));
        }
        Ok(())
    }

    /// Quizzes the learner is subscribed to, in subscription order.
    pub async fn quizzes_subscribed(&self, learner: &str) -> Result<Vec<SubscribedQuiz>, AppError> {
        let quizzes = sqlx::query_as::<_, SubscribedQuiz>(
            r#"
            SELECT s.quiz_id, q.name, q.alias, s.room_id, s.daily_quota
            FROM subscriptions s
            JOIN quizzes q ON q.id = s.quiz_id
            WHERE s.learner_id = ?1
            ORDER BY s.id
            "#,
        )
        .bind(learner)
        .fetch_all(&self.pool)
        .await?;

        Ok(quizzes)
    }

    /// Question ids already delivered to the learner within a quiz.
    pub async fn asked_questions(&self, learner: &str, quiz_id: i64) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT h.question_id FROM asked_history h
            JOIN questions q ON q.id = h.question_id
            WHERE h.learner_id = ?1 AND h.quiz_id = ?2
            ORDER BY q.position
            "#,
        )
        .bind(learner)
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Delivery state of every subscription, in quiz then subscription order.
    ///
    /// `day_start` is the instant the current delivery day began.
    pub async fn subscription_statuses(
        &self,
        day_start: DateTime<Utc>,
    ) -> Result<Vec<SubscriptionStatus>, AppError> {
        let statuses = sqlx::query_as::<_, SubscriptionStatus>(
            r#"
            SELECT
                s.learner_id,
                s.quiz_id,
                q.name AS quiz_name,
                s.room_id,
                s.daily_quota,
                (SELECT COUNT(*) FROM asked_history h
                    WHERE h.learner_id = s.learner_id
                      AND h.quiz_id = s.quiz_id
                      AND h.asked_at >= ?1) AS delivered_today,
                EXISTS (SELECT 1 FROM open_questions o
                    WHERE o.learner_id = s.learner_id
                      AND o.quiz_id = s.quiz_id
                      AND o.answered = 0) AS open_in_quiz,
                EXISTS (SELECT 1 FROM open_questions o
                    WHERE o.learner_id = s.learner_id
                      AND o.room_id = s.room_id
                      AND o.answered = 0) AS open_in_room
            FROM subscriptions s
            JOIN quizzes q ON q.id = s.quiz_id
            ORDER BY s.quiz_id, s.id
            "#,
        )
        .bind(day_start)
        .fetch_all(&self.pool)
        .await?;

        Ok(statuses)
    }
}

/// Appended to the reply when a learner finishes a quiz.
pub fn completion_message(quiz_name: &str) -> String {
    format!(
        "Congratulations, you have answered all questions of {}! You are now unsubscribed.",
        quiz_name
    )
}

/// Rejection for a quota outside `[0, MAX_DAILY_QUOTA]` or not a number.
pub fn out_of_range(raw: &str) -> AppError {
    AppError::Validation(format!(
        "'{}' is not a valid number of messages. Please choose a number between 0 and {}.",
        raw, MAX_DAILY_QUOTA
    ))
}

fn not_subscribed(quiz: &Quiz) -> AppError {
    AppError::NotFound(format!(
        "You are not subscribed to {}. Type 'subscribe {}' first.",
        quiz.name, quiz.alias
    ))
}

async fn find_subscription(
    tx: &mut Transaction<'_, Sqlite>,
    learner: &str,
    quiz_id: i64,
) -> Result<Option<Subscription>, AppError> {
    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        SELECT id, learner_id, quiz_id, room_id, daily_quota, created_at
        FROM subscriptions WHERE learner_id = ?1 AND quiz_id = ?2
        "#,
    )
    .bind(learner)
    .bind(quiz_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(subscription)
}

async fn clear_progress(
    tx: &mut Transaction<'_, Sqlite>,
    learner: &str,
    quiz_id: i64,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM asked_history WHERE learner_id = ?1 AND quiz_id = ?2")
        .bind(learner)
        .bind(quiz_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM open_questions WHERE learner_id = ?1 AND quiz_id = ?2")
        .bind(learner)
        .bind(quiz_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Deletes the subscription and its progress. Returns false if none existed.
async fn remove_subscription(
    tx: &mut Transaction<'_, Sqlite>,
    learner: &str,
    quiz_id: i64,
) -> Result<bool, AppError> {
    let result = sqlx::query("DELETE FROM subscriptions WHERE learner_id = ?1 AND quiz_id = ?2")
        .bind(learner)
        .bind(quiz_id)
        .execute(&mut **tx)
        .await?;

    clear_progress(tx, learner, quiz_id).await?;
    Ok(result.rows_affected() > 0)
}
