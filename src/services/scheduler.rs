// src/services/scheduler.rs

use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::{DateTime, Local, Timelike, Utc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ScheduleConfig,
    error::AppError,
    models::progress::{NextQuestion, SubscriptionStatus},
    services::{
        catalog::Catalog,
        progress::{ProgressTracker, completion_message},
    },
    transport::Transport,
};

/// Local hours `[start, end)` in which questions are pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl ActiveWindow {
    pub fn contains(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour < self.end_hour
    }
}

/// What one scheduler tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    OutsideWindow,
    Completed { pushed: usize, failed: usize },
}

/// Subscriptions that should get a question now.
///
/// A subscription is due when it is under quota and nothing is open in its
/// quiz or its room. Only the first due subscription of each room is kept.
pub fn select_due(statuses: &[SubscriptionStatus]) -> Vec<&SubscriptionStatus> {
    let mut rooms = HashSet::new();
    statuses
        .iter()
        .filter(|s| s.delivered_today < s.daily_quota && !s.open_in_quiz && !s.open_in_room)
        .filter(|s| rooms.insert(s.room_id.as_str()))
        .collect()
}

/// Local midnight of `now`, as UTC.
pub fn day_start(now: DateTime<Local>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc) - chrono::Duration::hours(24))
}

/// Time left until the next full hour.
fn until_next_hour(now: DateTime<Local>) -> Duration {
    let elapsed = u64::from(now.minute()) * 60 + u64::from(now.second());
    Duration::from_secs(3600 - elapsed.min(3599))
}

/// Background task pushing questions to learners within the daily quota.
pub struct PacingScheduler {
    catalog: Catalog,
    progress: ProgressTracker,
    transport: Arc<dyn Transport>,
    window: ActiveWindow,
    interval: Duration,
}

impl PacingScheduler {
    pub fn new(
        catalog: Catalog,
        progress: ProgressTracker,
        transport: Arc<dyn Transport>,
        config: &ScheduleConfig,
    ) -> Self {
        Self {
            catalog,
            progress,
            transport,
            window: ActiveWindow {
                start_hour: config.active_start_hour,
                end_hour: config.active_end_hour,
            },
            interval: Duration::from_secs(config.cycle_interval_secs),
        }
    }

    /// Runs until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            start_hour = self.window.start_hour,
            end_hour = self.window.end_hour,
            interval_secs = self.interval.as_secs(),
            "Starting pacing scheduler"
        );

        loop {
            let now = Local::now();
            let pause = match self.tick(now).await {
                Ok(CycleOutcome::OutsideWindow) => {
                    tracing::debug!("Outside active window, waiting for the next hour");
                    until_next_hour(now)
                }
                Ok(CycleOutcome::Completed { pushed, failed }) => {
                    tracing::info!(pushed, failed, "Scheduler cycle completed");
                    self.interval
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Scheduler cycle failed");
                    self.interval
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(pause) => {}
            }
        }

        tracing::info!("Pacing scheduler stopped");
    }

    /// One cycle at local time `now`.
    pub async fn tick(&self, now: DateTime<Local>) -> Result<CycleOutcome, AppError> {
        if !self.window.contains(now.hour()) {
            return Ok(CycleOutcome::OutsideWindow);
        }

        let statuses = self.progress.subscription_statuses(day_start(now)).await?;
        let due = select_due(&statuses);

        let mut pushed = 0;
        let mut failed = 0;
        for status in due {
            match self.deliver(status).await {
                Ok(()) => pushed += 1,
                Err(err) => {
                    failed += 1;
                    tracing::warn!(
                        learner = %status.learner_id,
                        quiz_id = status.quiz_id,
                        room = %status.room_id,
                        error = %err,
                        "Scheduled delivery failed"
                    );
                }
            }
        }

        Ok(CycleOutcome::Completed { pushed, failed })
    }

    /// Opens the next question and sends it. A failed send leaves the
    /// question marked as delivered.
    async fn deliver(&self, status: &SubscriptionStatus) -> Result<(), AppError> {
        let quiz = self.catalog.get(status.quiz_id).await?;
        let text = match self
            .progress
            .next_question(&status.learner_id, &quiz, &status.room_id)
            .await?
        {
            NextQuestion::Delivered(question) => {
                format!("Question from {}:\n{}", quiz.name, question.render())
            }
            NextQuestion::Completed { quiz_name } => completion_message(&quiz_name),
        };

        self.transport.send(&status.room_id, &text).await
    }
}
