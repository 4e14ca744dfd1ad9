use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quizmesh::client::LockstepPlayer;
use quizmesh::config::{ScoringConfig, TimingConfig};
use quizmesh::host::{create_room, HostController};
use quizmesh::store::{paths, MemoryStore, RoomStore};
use quizmesh::types::{
    Choice, Phase, Question, QuestionKind, Room, SessionMode, Statement, Submission,
};

/// Demo quiz for the local harness.
fn demo_quiz() -> Vec<Question> {
    vec![
        Question::SingleChoice {
            id: "q0".into(),
            prompt: "Which planet is closest to the sun?".into(),
            choices: vec![
                Choice { text: "Venus".into(), image_url: None },
                Choice { text: "Mercury".into(), image_url: None },
                Choice { text: "Mars".into(), image_url: None },
            ],
            correct_index: 1,
            image_url: None,
        },
        Question::MultiTruth {
            id: "q1".into(),
            prompt: "True or false?".into(),
            statements: vec![
                Statement { text: "Water boils at 100°C at sea level".into(), expected: true },
                Statement { text: "Sound travels faster than light".into(), expected: false },
                Statement { text: "The Pacific is the largest ocean".into(), expected: true },
                Statement { text: "Spiders are insects".into(), expected: false },
            ],
        },
        Question::ShortAnswer {
            id: "q2".into(),
            prompt: "Capital of France?".into(),
            expected: "Paris".into(),
        },
    ]
}

/// A scripted participant: joins, follows the phase feed, and answers every
/// question (correctly most of the time).
async fn spawn_player(store: &MemoryStore, pin: String, name: &'static str) {
    let client = Arc::new(store.client());
    let mut player = LockstepPlayer::join(
        client,
        pin,
        name.to_string(),
        TimingConfig::from_env(),
        ScoringConfig::from_env(),
    )
    .await
    .expect("join failed");

    tokio::spawn(async move {
        let mut answered_index = None;
        while let Ok(Some(view)) = player.observe().await {
            if view.phase == Phase::Finished {
                tracing::info!(player = name, score = view.score, "session over");
                break;
            }
            if view.phase != Phase::Question || answered_index == Some(view.question_index) {
                continue;
            }
            answered_index = Some(view.question_index);

            let lucky = rand::rng().random_bool(0.7);
            let submission = match view.question_index {
                0 => Submission::Choice { index: if lucky { 1 } else { 0 } },
                1 => Submission::Truths {
                    values: vec![true, false, lucky, !lucky],
                },
                _ => Submission::Text {
                    value: if lucky { " paris ".into() } else { "Lyon".into() },
                },
            };
            match player.submit(submission).await {
                Ok(outcome) => tracing::info!(player = name, ?outcome, "answered"),
                Err(e) => tracing::error!(player = name, "submit failed: {e}"),
            }
        }
    });
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quizmesh=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting quizmesh local session...");

    // Short countdowns so the demo session is over in under a minute
    let timing = TimingConfig {
        first_prepare_seconds: 2,
        prepare_seconds: 1,
        result_seconds: 1,
    };
    let mut limits = HashMap::new();
    limits.insert(QuestionKind::SingleChoice, 2);
    limits.insert(QuestionKind::MultiTruth, 2);
    limits.insert(QuestionKind::ShortAnswer, 2);

    let store = MemoryStore::new();
    let host_client = store.client();
    let pin = create_room(&host_client, SessionMode::Lockstep, demo_quiz(), limits, None)
        .await
        .expect("room creation failed");
    tracing::info!(%pin, "room ready");

    let (controller, handle) =
        HostController::attach(Arc::new(store.client()), pin.clone(), timing)
            .await
            .expect("host attach failed");
    let host_task = tokio::spawn(controller.run());

    spawn_player(&store, pin.clone(), "ada").await;
    spawn_player(&store, pin.clone(), "grace").await;

    handle.start().expect("host start failed");
    host_task.await.expect("host task panicked");

    // Final scoreboard straight from the store
    let raw = host_client
        .read(&paths::room(&pin))
        .await
        .expect("read failed")
        .expect("room vanished");
    let room: Room = serde_json::from_value(raw).expect("malformed room");
    let mut scores: Vec<_> = room
        .participants
        .values()
        .map(|p| (p.display_name.clone(), p.score))
        .collect();
    scores.sort_by(|a, b| b.1.cmp(&a.1));
    for (name, score) in scores {
        println!("{name:>10}  {score}");
    }
}
