use quizmesh::client::{standings, LockstepPlayer, PoolClient, PoolHost};
use quizmesh::config::{ScoringConfig, TimingConfig};
use quizmesh::host::{create_room, HostController};
use quizmesh::store::{paths, MemoryStore, RoomStore};
use quizmesh::types::{
    Choice, ClaimOutcome, Phase, Question, QuestionKind, Room, SessionMode, Standing, Statement,
    Submission,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn quiz() -> Vec<Question> {
    vec![
        Question::SingleChoice {
            id: "q0".into(),
            prompt: "Which planet is closest to the sun?".into(),
            choices: vec![
                Choice { text: "Venus".into(), image_url: None },
                Choice { text: "Mercury".into(), image_url: None },
            ],
            correct_index: 1,
            image_url: None,
        },
        Question::MultiTruth {
            id: "q1".into(),
            prompt: "True or false?".into(),
            statements: vec![
                Statement { text: "a".into(), expected: true },
                Statement { text: "b".into(), expected: false },
                Statement { text: "c".into(), expected: true },
                Statement { text: "d".into(), expected: false },
            ],
        },
        Question::ShortAnswer {
            id: "q2".into(),
            prompt: "Capital of France?".into(),
            expected: "Paris".into(),
        },
    ]
}

fn correct_answer(index: u32) -> Submission {
    match index {
        0 => Submission::Choice { index: 1 },
        1 => Submission::Truths {
            values: vec![true, false, true, false],
        },
        _ => Submission::Text {
            value: " PARIS ".into(),
        },
    }
}

fn limits() -> HashMap<QuestionKind, u32> {
    let mut m = HashMap::new();
    m.insert(QuestionKind::SingleChoice, 2);
    m.insert(QuestionKind::MultiTruth, 2);
    m.insert(QuestionKind::ShortAnswer, 2);
    m
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Fold in every queued room notification for a pool client.
async fn drain(client: &mut PoolClient) {
    while let Ok(obs) = tokio::time::timeout(Duration::from_millis(50), client.observe()).await {
        if obs.unwrap().is_none() {
            break;
        }
    }
}

async fn read_room(store: &MemoryStore, pin: &str) -> Room {
    let raw = store
        .client()
        .read(&paths::room(&pin.to_string()))
        .await
        .unwrap()
        .unwrap();
    serde_json::from_value(raw).unwrap()
}

/// A whole lock-step session: host drives the phase machine on virtual
/// time, two players follow it and answer everything correctly.
#[tokio::test(start_paused = true)]
async fn full_lockstep_session_converges_and_scores() {
    let store = MemoryStore::new();
    let host_client = store.client();
    let timing = TimingConfig {
        first_prepare_seconds: 2,
        prepare_seconds: 1,
        result_seconds: 1,
    };

    let pin = create_room(&host_client, SessionMode::Lockstep, quiz(), limits(), None)
        .await
        .unwrap();

    let mut player_ids = Vec::new();
    let mut player_tasks = Vec::new();
    for name in ["Ada", "Grace"] {
        let mut player = LockstepPlayer::join(
            Arc::new(store.client()),
            pin.clone(),
            name.to_string(),
            timing.clone(),
            ScoringConfig::default(),
        )
        .await
        .unwrap();
        player_ids.push(player.id().clone());

        player_tasks.push(tokio::spawn(async move {
            let mut answered = None;
            while let Some(view) = player.observe().await.unwrap() {
                match view.phase {
                    Phase::Finished => return view.score,
                    Phase::Question if answered != Some(view.question_index) => {
                        answered = Some(view.question_index);
                        player
                            .submit(correct_answer(view.question_index))
                            .await
                            .unwrap();
                    }
                    _ => {}
                }
            }
            panic!("subscription ended before the session finished");
        }));
    }

    let (controller, handle) =
        HostController::attach(Arc::new(store.client()), pin.clone(), timing)
            .await
            .unwrap();
    let host_task = tokio::spawn(controller.run());

    handle.start().unwrap();
    tokio::time::timeout(Duration::from_secs(300), host_task)
        .await
        .expect("session did not finish")
        .unwrap();

    let room = read_room(&store, &pin).await;
    assert_eq!(room.phase, Phase::Finished);

    for task in player_tasks {
        let final_score = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(final_score, 300);
    }
    for id in &player_ids {
        let p = &room.participants[id];
        assert_eq!(p.score, 300);
        assert_eq!(p.answers.len(), 3);
    }
}

/// N concurrent fully-correct submissions against one unclaimed index:
/// exactly one commits, everyone else observes "occupied".
#[tokio::test]
async fn race_claim_commits_exactly_once() {
    let store = MemoryStore::new();
    let host_client = store.client();
    let pin = create_room(&host_client, SessionMode::TimedPool, quiz(), limits(), None)
        .await
        .unwrap();
    let start = host_client.server_now_ms().await;
    host_client
        .write(
            &paths::room(&pin),
            serde_json::json!({ "phase": "PLAYING", "startTime": start, "duration": 600_000u64 }),
        )
        .await
        .unwrap();

    let mut racers = Vec::new();
    for i in 0..6 {
        let mut client = PoolClient::join(
            Arc::new(store.client()),
            pin.clone(),
            format!("racer-{i}"),
            ScoringConfig::default(),
            1,
        )
        .await
        .unwrap();
        client.observe().await.unwrap();
        racers.push(client);
    }

    let at = now_ms();
    let outcomes = futures::future::join_all(
        racers
            .iter_mut()
            .map(|c| c.submit(2, correct_answer(2), at)),
    )
    .await;

    let mut winners = 0;
    let mut too_slow = 0;
    for outcome in outcomes {
        match outcome.unwrap() {
            ClaimOutcome::Won { points } => {
                winners += 1;
                assert_eq!(points, 100);
            }
            ClaimOutcome::TooSlow => too_slow += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(too_slow, 5);

    // the committed lock never changes under later transaction attempts
    let before = store
        .client()
        .read(&paths::question_lock(&pin, 2))
        .await
        .unwrap()
        .unwrap();
    let late = store
        .client()
        .transact(&paths::question_lock(&pin, 2), &|current| {
            if current.is_some() {
                None
            } else {
                Some(serde_json::json!({"winnerId": "late"}))
            }
        })
        .await
        .unwrap();
    assert!(!late.committed);
    let after = store
        .client()
        .read(&paths::question_lock(&pin, 2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before, after);
}

/// The spec'd two-team scenario: A attempts all three questions, B exhausts
/// its two reachable ones (the third is held by A). The session finishes as
/// soon as B runs out of legal moves, even though B scored less.
#[tokio::test]
async fn team_pool_finishes_when_two_teams_are_done() {
    let store = MemoryStore::new();
    let host_client = store.client();
    let pin = create_room(&host_client, SessionMode::TeamPool, quiz(), limits(), None)
        .await
        .unwrap();

    let (pool_host, handle) = PoolHost::attach(Arc::new(store.client()), pin.clone(), 600_000)
        .await
        .unwrap();
    let host_task = tokio::spawn(pool_host.run());

    let mut team_a = PoolClient::join(
        Arc::new(store.client()),
        pin.clone(),
        "Team A".into(),
        ScoringConfig::default(),
        1,
    )
    .await
    .unwrap();
    let mut team_b = PoolClient::join(
        Arc::new(store.client()),
        pin.clone(),
        "Team B".into(),
        ScoringConfig::default(),
        1,
    )
    .await
    .unwrap();

    handle.start().unwrap();

    // wait until both clients observe PLAYING
    while team_a.observe().await.unwrap() != Some(Phase::Playing) {}
    while team_b.observe().await.unwrap() != Some(Phase::Playing) {}

    // Team A attempts everything: claims q0, misses q1 and q2
    assert_eq!(
        team_a.submit(0, correct_answer(0), now_ms()).await.unwrap(),
        ClaimOutcome::Won { points: 100 }
    );
    team_a
        .submit(1, Submission::Truths { values: vec![false, true, false, true] }, now_ms())
        .await
        .unwrap();
    team_a
        .submit(2, Submission::Text { value: "Berlin".into() }, now_ms())
        .await
        .unwrap();
    assert!(team_a.is_finished());

    // Team B can only reach q1 and q2; q0 is locked away by A
    team_b.submit(1, correct_answer(1), now_ms()).await.unwrap();
    assert_eq!(
        team_b
            .submit(2, Submission::Text { value: "Rome".into() }, now_ms())
            .await
            .unwrap(),
        ClaimOutcome::Incorrect
    );
    // once B observes A's q0 lock, no legal move remains for B
    drain(&mut team_b).await;
    assert!(team_b.is_finished());

    // the pool host sees two finished teams and ends the session
    tokio::time::timeout(Duration::from_secs(5), host_task)
        .await
        .expect("pool host did not finish the session")
        .unwrap();

    let room = read_room(&store, &pin).await;
    assert_eq!(room.phase, Phase::Finished);
    let st = standings(&room);
    assert!(st.values().all(|s| *s == Standing::Completed));
}

/// Presence cleanup: the joiner registered its own removal, so a dropped
/// connection empties the room and the host finishes the session.
#[tokio::test(start_paused = true)]
async fn disconnect_cleanup_finishes_the_session() {
    let store = MemoryStore::new();
    let host_client = store.client();
    let pin = create_room(&host_client, SessionMode::Lockstep, quiz(), limits(), None)
        .await
        .unwrap();

    let player_conn = store.client();
    let _player = LockstepPlayer::join(
        Arc::new(player_conn.clone()),
        pin.clone(),
        "Flaky".into(),
        TimingConfig::default(),
        ScoringConfig::default(),
    )
    .await
    .unwrap();

    let (controller, handle) =
        HostController::attach(Arc::new(store.client()), pin.clone(), TimingConfig::default())
            .await
            .unwrap();
    let host_task = tokio::spawn(controller.run());
    handle.start().unwrap();

    // the network drops; the store removes the participant on its own
    player_conn.disconnect().await;

    tokio::time::timeout(Duration::from_secs(60), host_task)
        .await
        .expect("empty room did not finish the session")
        .unwrap();
    assert_eq!(read_room(&store, &pin).await.phase, Phase::Finished);
}

/// Two clients with wildly different local clocks agree on the remaining
/// time because the deadline is anchored on the server clock and corrected
/// through the offset feed.
#[tokio::test]
async fn pool_deadline_is_immune_to_clock_skew() {
    let store = MemoryStore::new();
    store.set_clock_skew(120_000).await;

    let host_client = store.client();
    let pin = create_room(&host_client, SessionMode::TimedPool, quiz(), limits(), None)
        .await
        .unwrap();

    let (pool_host, handle) = PoolHost::attach(Arc::new(store.client()), pin.clone(), 60_000)
        .await
        .unwrap();
    tokio::spawn(pool_host.run());

    let mut player = PoolClient::join(
        Arc::new(store.client()),
        pin.clone(),
        "Drifty".into(),
        ScoringConfig::default(),
        1,
    )
    .await
    .unwrap();

    handle.start().unwrap();
    while player.observe().await.unwrap() != Some(Phase::Playing) {}

    // despite the 2-minute server skew, remaining time is computed in
    // server terms: close to the full minute, never off by the skew
    let remaining = player.remaining_ms(now_ms()).unwrap();
    assert!(remaining > 55_000, "remaining was {remaining}");
    assert!(remaining <= 60_000, "remaining was {remaining}");
}
