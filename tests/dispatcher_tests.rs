// tests/dispatcher_tests.rs

mod common;

use common::{ADMIN, harness, seed_arithmetic, seed_math, seed_single};
use quizbot::services::dispatcher::{GREETING, HELP_TEXT, NOT_UNDERSTOOD};

const LEARNER: &str = "@bob:example.org";
const ROOM: &str = "!bob:example.org";

#[tokio::test]
async fn greets_and_helps() {
    let h = harness().await;
    assert_eq!(h.dispatcher.handle("Hello", ROOM, LEARNER).await, GREETING);
    assert_eq!(h.dispatcher.handle("help", ROOM, LEARNER).await, HELP_TEXT);
    assert_eq!(
        h.dispatcher.handle("what is this", ROOM, LEARNER).await,
        NOT_UNDERSTOOD
    );
}

#[tokio::test]
async fn lists_quizzes_by_alias() {
    let h = harness().await;
    assert_eq!(
        h.dispatcher.handle("quizzes", ROOM, LEARNER).await,
        "There are no quizzes yet."
    );

    seed_math(&h.catalog).await;
    seed_arithmetic(&h.catalog).await;
    assert_eq!(
        h.dispatcher.handle("quizzes", ROOM, LEARNER).await,
        "Available quizzes:\n1) Math (1 questions)\n2) Arithmetic (2 questions)\n"
    );
}

#[tokio::test]
async fn single_question_quiz_round_trip() {
    let h = harness().await;
    let quiz = seed_math(&h.catalog).await;

    let reply = h.dispatcher.handle("subscribe math", ROOM, LEARNER).await;
    assert_eq!(
        reply,
        "You are now subscribed to Math. Type 'nq 1' to get your first question."
    );

    let reply = h.dispatcher.handle("nextquestion math", ROOM, LEARNER).await;
    assert_eq!(reply, "What is 2+2?\nA) 3\nB) 4\n");

    let reply = h.dispatcher.handle("b", ROOM, LEARNER).await;
    assert!(reply.starts_with("Correct!\nWell done, 2+2 is 4."));
    assert!(reply.ends_with(
        "Congratulations, you have answered all questions of Math! You are now unsubscribed."
    ));

    assert!(h.progress.quizzes_subscribed(LEARNER).await.unwrap().is_empty());
    assert!(h.progress.open_question_in_quiz(LEARNER, quiz.id).await.unwrap().is_none());
}

#[tokio::test]
async fn next_question_without_subscriptions() {
    let h = harness().await;
    seed_math(&h.catalog).await;

    assert_eq!(
        h.dispatcher.handle("nq", ROOM, LEARNER).await,
        "This Quiz does not exist."
    );
}

#[tokio::test]
async fn next_question_with_two_subscriptions_asks_which() {
    let h = harness().await;
    seed_math(&h.catalog).await;
    seed_arithmetic(&h.catalog).await;
    h.dispatcher.handle("sub math", ROOM, LEARNER).await;
    h.dispatcher.handle("sub 2", ROOM, LEARNER).await;

    let reply = h.dispatcher.handle("nq", ROOM, LEARNER).await;
    assert!(reply.starts_with("You are subscribed to more than one quiz."));
    assert!(h.progress.open_question(LEARNER, ROOM).await.unwrap().is_none());
}

#[tokio::test]
async fn next_question_with_one_subscription_uses_it() {
    let h = harness().await;
    seed_arithmetic(&h.catalog).await;
    h.dispatcher.handle("subscribe Arithmetic", ROOM, LEARNER).await;

    let reply = h.dispatcher.handle("NQ", ROOM, LEARNER).await;
    assert_eq!(reply, "What is 2+2?\nA) 3\nB) 4\n");
}

#[tokio::test]
async fn out_of_range_quota_is_explained() {
    let h = harness().await;
    seed_math(&h.catalog).await;
    h.dispatcher.handle("subscribe math", ROOM, LEARNER).await;

    assert_eq!(
        h.dispatcher.handle("messages math 15", ROOM, LEARNER).await,
        "'15' is not a valid number of messages. Please choose a number between 0 and 10."
    );
    assert_eq!(
        h.dispatcher.handle("messages math 3", ROOM, LEARNER).await,
        "You will now receive up to 3 question(s) per day from Math."
    );
    assert_eq!(
        h.progress.quizzes_subscribed(LEARNER).await.unwrap()[0].daily_quota,
        3
    );
}

#[tokio::test]
async fn commands_without_a_quiz_get_usage() {
    let h = harness().await;
    assert_eq!(
        h.dispatcher.handle("subscribe", ROOM, LEARNER).await,
        "Please tell me which quiz, e.g. 'subscribe math'."
    );
    assert_eq!(
        h.dispatcher.handle("messages", ROOM, LEARNER).await,
        "Please tell me the quiz and a number, e.g. 'messages math 3'."
    );
}

#[tokio::test]
async fn unknown_quiz_is_reported() {
    let h = harness().await;
    seed_math(&h.catalog).await;
    assert_eq!(
        h.dispatcher.handle("subscribe geography", ROOM, LEARNER).await,
        "This Quiz does not exist."
    );
    assert_eq!(
        h.dispatcher.handle("subscribe 7", ROOM, LEARNER).await,
        "This Quiz does not exist."
    );
}

#[tokio::test]
async fn open_question_blocks_next_question() {
    let h = harness().await;
    seed_arithmetic(&h.catalog).await;
    h.dispatcher.handle("sub arithmetic", ROOM, LEARNER).await;
    h.dispatcher.handle("nq", ROOM, LEARNER).await;

    assert_eq!(
        h.dispatcher.handle("nq", ROOM, LEARNER).await,
        "You still have an open question. Please answer it first."
    );
}

#[tokio::test]
async fn multiple_correct_answers_are_graded_as_a_set() {
    let h = harness().await;
    let quiz = h
        .catalog
        .create(quizbot::models::quiz::NewQuiz {
            name: "Colors".to_string(),
            daily_quota: 1,
            questions: vec![
                common::choice(
                    "c1",
                    "Which are primary colors?",
                    &[("A", "Red", true), ("B", "Green", false), ("C", "Blue", true)],
                    vec![],
                ),
                common::choice(
                    "c2",
                    "Which are warm colors?",
                    &[("A", "Red", true), ("B", "Orange", true), ("C", "Blue", false)],
                    vec![],
                ),
            ],
        })
        .await
        .unwrap();
    h.progress.subscribe(LEARNER, &quiz, ROOM).await.unwrap();

    h.dispatcher.handle("nq colors", ROOM, LEARNER).await;
    let reply = h.dispatcher.handle("a", ROOM, LEARNER).await;
    assert!(reply.starts_with("Partly correct."));

    h.dispatcher.handle("nq colors", ROOM, LEARNER).await;
    let reply = h.dispatcher.handle("Red and Orange", ROOM, LEARNER).await;
    assert!(reply.starts_with("Correct!"));
}

#[tokio::test]
async fn answers_after_the_question_fall_through() {
    let h = harness().await;
    seed_arithmetic(&h.catalog).await;
    h.dispatcher.handle("sub arithmetic", ROOM, LEARNER).await;
    h.dispatcher.handle("nq", ROOM, LEARNER).await;

    let reply = h.dispatcher.handle("b", ROOM, LEARNER).await;
    assert!(reply.starts_with("Correct!"));

    // The question is answered now; a second answer is not understood.
    assert_eq!(h.dispatcher.handle("b", ROOM, LEARNER).await, NOT_UNDERSTOOD);
}

#[tokio::test]
async fn answers_only_count_in_the_delivery_room() {
    let h = harness().await;
    seed_arithmetic(&h.catalog).await;
    h.dispatcher.handle("sub arithmetic", ROOM, LEARNER).await;
    h.dispatcher.handle("nq", ROOM, LEARNER).await;

    assert_eq!(
        h.dispatcher.handle("b", "!elsewhere:example.org", LEARNER).await,
        NOT_UNDERSTOOD
    );
    assert!(h.progress.open_question(LEARNER, ROOM).await.unwrap().is_some());
}

#[tokio::test]
async fn subscribed_lists_quota() {
    let h = harness().await;
    seed_math(&h.catalog).await;
    assert_eq!(
        h.dispatcher.handle("subscribed", ROOM, LEARNER).await,
        "You are not subscribed to any quiz."
    );

    h.dispatcher.handle("sub math", ROOM, LEARNER).await;
    assert_eq!(
        h.dispatcher.handle("subscribed", ROOM, LEARNER).await,
        "You are subscribed to:\n1) Math (1 per day)\n"
    );
}

#[tokio::test]
async fn unsubscribe_and_reset() {
    let h = harness().await;
    let quiz = seed_arithmetic(&h.catalog).await;
    h.dispatcher.handle("sub arithmetic", ROOM, LEARNER).await;
    h.dispatcher.handle("nq", ROOM, LEARNER).await;

    assert_eq!(
        h.dispatcher.handle("reset arithmetic", ROOM, LEARNER).await,
        "Your progress in Arithmetic has been reset. Type 'nq 1' to start again."
    );
    assert!(h.progress.asked_questions(LEARNER, quiz.id).await.unwrap().is_empty());

    assert_eq!(
        h.dispatcher.handle("unsub 1", ROOM, LEARNER).await,
        "You are no longer subscribed to Arithmetic."
    );
    assert_eq!(
        h.dispatcher.handle("unsub 1", ROOM, LEARNER).await,
        "You are not subscribed to Arithmetic. Type 'subscribe 1' first."
    );
}

#[tokio::test]
async fn only_admins_delete_quizzes() {
    let h = harness().await;
    seed_single(&h.catalog, "Doomed", 1).await;

    assert_eq!(
        h.dispatcher.handle("delete doomed", ROOM, LEARNER).await,
        "Only administrators can delete quizzes."
    );
    assert_eq!(h.catalog.list().await.unwrap().len(), 1);

    assert_eq!(
        h.dispatcher.handle("delete doomed", ROOM, ADMIN).await,
        "Quiz Doomed has been deleted."
    );
    assert!(h.catalog.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn essay_answers_get_the_model_answer() {
    use quizbot::models::{
        question::{Feedback, FeedbackTag, Question, QuestionKind},
        quiz::NewQuiz,
    };

    let h = harness().await;
    let quiz = h
        .catalog
        .create(NewQuiz {
            name: "Physics".to_string(),
            daily_quota: 1,
            questions: vec![
                Question::new(
                    "e1",
                    QuestionKind::Essay,
                    "Why is the sky blue?",
                    vec![],
                    vec![Feedback::new(FeedbackTag::ModelAnswer, "Rayleigh scattering.")],
                )
                .unwrap(),
            ],
        })
        .await
        .unwrap();
    h.progress.subscribe(LEARNER, &quiz, ROOM).await.unwrap();

    assert_eq!(
        h.dispatcher.handle("nq physics", ROOM, LEARNER).await,
        "Why is the sky blue?\n"
    );
    let reply = h.dispatcher.handle("Because of the air", ROOM, LEARNER).await;
    assert!(reply.starts_with("Thank you for your answer.\nModel answer: Rayleigh scattering."));
}
