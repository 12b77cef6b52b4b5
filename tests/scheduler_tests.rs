// tests/scheduler_tests.rs

mod common;

use std::{sync::Arc, time::Duration};

use chrono::{Local, TimeZone};
use common::{harness, seed_arithmetic, seed_single};
use quizbot::{
    config::ScheduleConfig,
    services::scheduler::{CycleOutcome, PacingScheduler},
    transport::{InboundEvent, memory::MemoryTransport, run_event_loop},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const LEARNER: &str = "@carol:example.org";
const ROOM: &str = "!carol:example.org";

fn always_active() -> ScheduleConfig {
    ScheduleConfig {
        active_start_hour: 0,
        active_end_hour: 24,
        cycle_interval_secs: 1,
    }
}

#[tokio::test]
async fn shared_room_gets_one_question_per_cycle() {
    let h = harness().await;
    let history = seed_single(&h.catalog, "History", 3).await;
    let physics = seed_single(&h.catalog, "Physics", 3).await;
    h.progress.subscribe(LEARNER, &history, ROOM).await.unwrap();
    h.progress.subscribe(LEARNER, &physics, ROOM).await.unwrap();

    let transport = MemoryTransport::new();
    let scheduler = PacingScheduler::new(
        h.catalog.clone(),
        h.progress.clone(),
        Arc::new(transport.clone()),
        &always_active(),
    );

    let outcome = scheduler.tick(Local::now()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed { pushed: 1, failed: 0 });
    assert_eq!(
        transport.sent_to(ROOM),
        vec!["Question from History:\nOnly question of History?\nA) yes\nB) no\n".to_string()]
    );

    // The room is busy until the learner answers.
    let outcome = scheduler.tick(Local::now()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed { pushed: 0, failed: 0 });

    h.dispatcher.handle("a", ROOM, LEARNER).await;

    let outcome = scheduler.tick(Local::now()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed { pushed: 1, failed: 0 });
    assert_eq!(transport.sent_to(ROOM).len(), 2);
    assert!(transport.sent_to(ROOM)[1].starts_with("Question from Physics:"));
}

#[tokio::test]
async fn daily_quota_caps_pushes() {
    let h = harness().await;
    let quiz = seed_arithmetic(&h.catalog).await;
    h.progress.subscribe(LEARNER, &quiz, ROOM).await.unwrap();
    h.progress.set_quota(LEARNER, &quiz, 1).await.unwrap();

    let transport = MemoryTransport::new();
    let scheduler = PacingScheduler::new(
        h.catalog.clone(),
        h.progress.clone(),
        Arc::new(transport.clone()),
        &always_active(),
    );

    scheduler.tick(Local::now()).await.unwrap();
    h.dispatcher.handle("b", ROOM, LEARNER).await;

    let outcome = scheduler.tick(Local::now()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed { pushed: 0, failed: 0 });
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn zero_quota_mutes_a_subscription() {
    let h = harness().await;
    let quiz = seed_single(&h.catalog, "Quiet", 0).await;
    h.progress.subscribe(LEARNER, &quiz, ROOM).await.unwrap();

    let transport = MemoryTransport::new();
    let scheduler = PacingScheduler::new(
        h.catalog.clone(),
        h.progress.clone(),
        Arc::new(transport.clone()),
        &always_active(),
    );

    let outcome = scheduler.tick(Local::now()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed { pushed: 0, failed: 0 });
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn nothing_is_pushed_outside_the_window() {
    let h = harness().await;
    let quiz = seed_single(&h.catalog, "Night", 5).await;
    h.progress.subscribe(LEARNER, &quiz, ROOM).await.unwrap();

    let transport = MemoryTransport::new();
    let scheduler = PacingScheduler::new(
        h.catalog.clone(),
        h.progress.clone(),
        Arc::new(transport.clone()),
        &ScheduleConfig::default(),
    );

    let late = Local.with_ymd_and_hms(2024, 3, 1, 22, 30, 0).single().unwrap();
    assert_eq!(scheduler.tick(late).await.unwrap(), CycleOutcome::OutsideWindow);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn a_failing_room_does_not_stop_the_cycle() {
    let h = harness().await;
    let quiz = seed_single(&h.catalog, "Shared", 2).await;
    h.progress.subscribe("@dave:example.org", &quiz, "!broken:example.org").await.unwrap();
    h.progress.subscribe(LEARNER, &quiz, ROOM).await.unwrap();

    let transport = MemoryTransport::new();
    transport.fail_room("!broken:example.org");
    let scheduler = PacingScheduler::new(
        h.catalog.clone(),
        h.progress.clone(),
        Arc::new(transport.clone()),
        &always_active(),
    );

    let outcome = scheduler.tick(Local::now()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed { pushed: 1, failed: 1 });
    assert_eq!(transport.sent_to(ROOM).len(), 1);

    // The failed delivery still counts as open, so it is not retried.
    let outcome = scheduler.tick(Local::now()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed { pushed: 0, failed: 0 });
}

#[tokio::test]
async fn scheduler_stops_on_cancel() {
    let h = harness().await;
    let scheduler = PacingScheduler::new(
        h.catalog.clone(),
        h.progress.clone(),
        Arc::new(MemoryTransport::new()),
        &always_active(),
    );

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[tokio::test]
async fn event_loop_joins_invites_and_answers_messages() {
    let h = harness().await;
    seed_single(&h.catalog, "Loop", 1).await;

    let transport = MemoryTransport::new();
    let (tx, rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();

    let events = [
        InboundEvent::Invite {
            room: ROOM.to_string(),
        },
        InboundEvent::Message {
            sender: LEARNER.to_string(),
            room: ROOM.to_string(),
            text: "sub loop".to_string(),
        },
        InboundEvent::Message {
            sender: "@bot:example.org".to_string(),
            room: ROOM.to_string(),
            text: "hello".to_string(),
        },
        InboundEvent::Message {
            sender: LEARNER.to_string(),
            room: ROOM.to_string(),
            text: "nq".to_string(),
        },
    ];
    for event in events {
        tx.send(event).await.unwrap();
    }
    drop(tx);

    run_event_loop(rx, h.dispatcher.clone(), &transport, "@bot:example.org", cancel).await;

    assert_eq!(transport.joined(), vec![ROOM.to_string()]);
    assert_eq!(
        transport.sent_to(ROOM),
        vec![
            "You are now subscribed to Loop. Type 'nq 1' to get your first question.".to_string(),
            "Only question of Loop?\nA) yes\nB) no\n".to_string(),
        ]
    );
}
