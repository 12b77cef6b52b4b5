// src/models/progress.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Represents the 'subscriptions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Subscription {
    pub id: i64,
    pub learner_id: String,
    pub quiz_id: i64,
    /// Room the questions of this quiz are delivered to.
    pub room_id: String,
    pub daily_quota: i64,
    pub created_at: DateTime<Utc>,
}

/// Represents the 'open_questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OpenQuestion {
    pub learner_id: String,
    pub quiz_id: i64,
    pub question_id: i64,
    pub room_id: String,
    pub answered: bool,
    pub asked_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

/// A quiz a learner is subscribed to, in subscription order.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SubscribedQuiz {
    pub quiz_id: i64,
    pub name: String,
    pub alias: i64,
    pub room_id: String,
    pub daily_quota: i64,
}

/// Delivery state of one subscription, as seen by the pacing scheduler.
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionStatus {
    pub learner_id: String,
    pub quiz_id: i64,
    pub quiz_name: String,
    pub room_id: String,
    pub daily_quota: i64,
    pub delivered_today: i64,
    pub open_in_quiz: bool,
    pub open_in_room: bool,
}

/// Result of asking for the next question of a quiz.
#[derive(Debug, Clone)]
pub enum NextQuestion {
    Delivered(crate::models::question::Question),
    /// Nothing left to ask; the learner has been unsubscribed.
    Completed { quiz_name: String },
}
