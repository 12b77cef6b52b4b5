// tests/common/mod.rs

#![allow(dead_code)]

use quizbot::{
    db,
    models::{
        question::{Answer, Feedback, FeedbackTag, Question, QuestionKind},
        quiz::{NewQuiz, Quiz},
    },
    services::{catalog::Catalog, dispatcher::Dispatcher, progress::ProgressTracker},
};
use sqlx::SqlitePool;
use std::path::PathBuf;

pub const ADMIN: &str = "@admin:example.org";

/// Fresh in-memory database with the schema applied.
pub async fn test_pool() -> SqlitePool {
    let pool = db::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");
    db::migrate(&pool).await.expect("Failed to migrate database");
    pool
}

/// Fresh database file under the temp dir, for tests that need several
/// connections. Remove it with [`remove_db_file`].
pub async fn file_pool() -> (SqlitePool, PathBuf) {
    let path = std::env::temp_dir().join(format!("quizbot-{}.db", uuid::Uuid::new_v4()));
    let pool = db::connect(&format!("sqlite://{}", path.display()))
        .await
        .expect("Failed to open database file");
    db::migrate(&pool).await.expect("Failed to migrate database");
    (pool, path)
}

pub async fn remove_db_file(pool: SqlitePool, path: PathBuf) {
    pool.close().await;
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
    }
}

pub struct Harness {
    pub pool: SqlitePool,
    pub catalog: Catalog,
    pub progress: ProgressTracker,
    pub dispatcher: Dispatcher,
}

pub async fn harness() -> Harness {
    harness_on(test_pool().await)
}

pub fn harness_on(pool: SqlitePool) -> Harness {
    let catalog = Catalog::new(pool.clone());
    let progress = ProgressTracker::new(pool.clone(), catalog.clone());
    let dispatcher = Dispatcher::new(catalog.clone(), progress.clone(), vec![ADMIN.to_string()]);
    Harness {
        pool,
        catalog,
        progress,
        dispatcher,
    }
}

pub fn choice(
    ident: &str,
    prompt: &str,
    answers: &[(&str, &str, bool)],
    feedback: Vec<Feedback>,
) -> Question {
    let kind = if answers.iter().filter(|(_, _, c)| *c).count() > 1 {
        QuestionKind::MultipleCorrect
    } else {
        QuestionKind::MultipleChoice
    };
    Question::new(
        ident,
        kind,
        prompt,
        answers
            .iter()
            .map(|(id, text, correct)| Answer::new(*id, *text, *correct))
            .collect(),
        feedback,
    )
    .expect("valid question")
}

/// "Math": one question, "What is 2+2?" A) 3  B) 4 (correct), with Correct feedback.
pub async fn seed_math(catalog: &Catalog) -> Quiz {
    catalog
        .create(NewQuiz {
            name: "Math".to_string(),
            daily_quota: 1,
            questions: vec![choice(
                "q1",
                "What is 2+2?",
                &[("A", "3", false), ("B", "4", true)],
                vec![Feedback::new(FeedbackTag::Correct, "Well done, 2+2 is 4.")],
            )],
        })
        .await
        .expect("Failed to seed Math quiz")
}

/// "Arithmetic": "What is 2+2?" then "What is 3*3?" A) 9 (correct)  B) 6.
pub async fn seed_arithmetic(catalog: &Catalog) -> Quiz {
    catalog
        .create(NewQuiz {
            name: "Arithmetic".to_string(),
            daily_quota: 2,
            questions: vec![
                choice(
                    "a1",
                    "What is 2+2?",
                    &[("A", "3", false), ("B", "4", true)],
                    vec![],
                ),
                choice(
                    "a2",
                    "What is 3*3?",
                    &[("A", "9", true), ("B", "6", false)],
                    vec![],
                ),
            ],
        })
        .await
        .expect("Failed to seed Arithmetic quiz")
}

/// Single-question quiz named `name`.
pub async fn seed_single(catalog: &Catalog, name: &str, daily_quota: i64) -> Quiz {
    catalog
        .create(NewQuiz {
            name: name.to_string(),
            daily_quota,
            questions: vec![choice(
                "only",
                &format!("Only question of {}?", name),
                &[("A", "yes", true), ("B", "no", false)],
                vec![],
            )],
        })
        .await
        .expect("Failed to seed quiz")
}

/// `count` single-answer questions; the correct answer is always "A".
pub async fn seed_long(catalog: &Catalog, name: &str, count: usize) -> Quiz {
    let questions = (1..=count)
        .map(|i| {
            choice(
                &format!("l{}", i),
                &format!("Question {} of {}?", i, name),
                &[("A", "right", true), ("B", "wrong", false)],
                vec![],
            )
        })
        .collect();
    catalog
        .create(NewQuiz {
            name: name.to_string(),
            daily_quota: 10,
            questions,
        })
        .await
        .expect("Failed to seed quiz")
}
