//! Lock-step Host Phase Controller.
//!
//! The controller is the sole writer of `phase` and `currentQuestionIndex`
//! for its room. It runs one once-per-second timer, performs the transition
//! merge-write when its countdown hits zero, and finishes the session if the
//! participant set empties out. Exactly one controller instance per room is
//! assumed; two instances would race each other (the store only arbitrates
//! the question locks, not the phase).

use crate::config::TimingConfig;
use crate::error::SessionError;
use crate::store::{paths, RoomStore, Subscription};
use crate::types::{Phase, Pin, Question, QuestionKind, Room, SessionMode};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Safe character set for room PINs (excludes 0/O, 1/I/L to avoid confusion)
const PIN_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const PIN_LENGTH: usize = 5;

fn generate_pin() -> Pin {
    let mut rng = rand::rng();
    (0..PIN_LENGTH)
        .map(|_| PIN_CHARS[rng.random_range(0..PIN_CHARS.len())] as char)
        .collect()
}

/// Create a room under a fresh PIN. `quiz` becomes the immutable
/// `quizSnapshot`: later authoring edits never reach a running session.
pub async fn create_room(
    store: &dyn RoomStore,
    mode: SessionMode,
    quiz: Vec<Question>,
    per_type_time_limit: HashMap<QuestionKind, u32>,
    view_mode: Option<String>,
) -> Result<Pin, SessionError> {
    let pin = loop {
        let candidate = generate_pin();
        if store.read(&paths::room(&candidate)).await?.is_none() {
            break candidate;
        }
        // Collision - try again (extremely rare with 24M combinations)
    };

    let room = Room {
        mode,
        phase: match mode {
            SessionMode::Lockstep => Phase::Waiting,
            SessionMode::TimedPool | SessionMode::TeamPool => Phase::Lobby,
        },
        current_question_index: 0,
        quiz_snapshot: quiz,
        per_type_time_limit,
        view_mode,
        start_time: None,
        duration: None,
        participants: HashMap::new(),
        question_locks: HashMap::new(),
    };

    store
        .write(&paths::room(&pin), serde_json::to_value(&room)?)
        .await?;
    tracing::info!(%pin, ?mode, "room created");
    Ok(pin)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// WAITING → PREPARE at question 0.
    Start,
    /// QUESTION → RESULT immediately.
    SkipQuestion,
    /// Any active state → FINISHED.
    EndEarly,
}

/// Command side of a running controller. Cheap to clone; sending fails once
/// the controller has stopped.
#[derive(Clone)]
pub struct HostHandle {
    tx: mpsc::UnboundedSender<HostCommand>,
}

impl HostHandle {
    pub fn start(&self) -> Result<(), String> {
        self.send(HostCommand::Start)
    }

    pub fn skip_question(&self) -> Result<(), String> {
        self.send(HostCommand::SkipQuestion)
    }

    pub fn end_early(&self) -> Result<(), String> {
        self.send(HostCommand::EndEarly)
    }

    fn send(&self, cmd: HostCommand) -> Result<(), String> {
        self.tx
            .send(cmd)
            .map_err(|_| "host controller has stopped".to_string())
    }
}

pub struct HostController {
    store: Arc<dyn RoomStore>,
    pin: Pin,
    timing: TimingConfig,
    quiz: Vec<Question>,
    time_limits: HashMap<QuestionKind, u32>,
    phase: Phase,
    index: u32,
    /// Seconds left in the current timed phase; meaningless in WAITING.
    remaining: u32,
    /// Becomes true once anyone has joined; the empty-room rule only fires
    /// after that (a room nobody joined yet is just waiting).
    seen_participant: bool,
    commands: mpsc::UnboundedReceiver<HostCommand>,
    participants_sub: Subscription,
}

/// Which lock-step phase changes are legal. The empty-room and end-early
/// rules make FINISHED reachable from everywhere except itself.
fn is_valid_transition(from: Phase, to: Phase) -> bool {
    use Phase::*;
    match (from, to) {
        (Waiting, Prepare) => true,
        (Prepare, Question) => true,
        (Question, Result) => true,
        (Result, Prepare) => true,
        (Finished, _) => false,
        (_, Finished) => true,
        _ => false,
    }
}

impl HostController {
    /// Attach a controller to an existing lock-step room.
    pub async fn attach(
        store: Arc<dyn RoomStore>,
        pin: Pin,
        timing: TimingConfig,
    ) -> Result<(Self, HostHandle), SessionError> {
        let raw = store
            .read(&paths::room(&pin))
            .await?
            .ok_or_else(|| SessionError::RoomMissing { pin: pin.clone() })?;
        let room: Room = serde_json::from_value(raw)?;

        let participants_sub = store.subscribe(&paths::participants(&pin)).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let controller = Self {
            store,
            pin,
            timing,
            quiz: room.quiz_snapshot,
            time_limits: room.per_type_time_limit,
            phase: room.phase,
            index: room.current_question_index,
            remaining: 0,
            seen_participant: !room.participants.is_empty(),
            commands: rx,
            participants_sub,
        };
        Ok((controller, HostHandle { tx }))
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn question_index(&self) -> u32 {
        self.index
    }

    /// Drive the controller until the session reaches FINISHED or every
    /// handle is gone. Dropping the returned future stops the tick, so no
    /// stale writes can follow a host that left.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; consume that so the first tick is a
        // real second later
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick_once().await {
                        tracing::error!(pin = %self.pin, "tick failed: {e}");
                    }
                }
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if let Err(e) = self.handle_command(cmd).await {
                                tracing::warn!(pin = %self.pin, ?cmd, "rejected: {e}");
                            }
                        }
                        None => break,
                    }
                }
                snap = self.participants_sub.recv() => {
                    match snap {
                        Some(snap) => {
                            if let Err(e) = self.observe_participants(snap).await {
                                tracing::error!(pin = %self.pin, "participant watch failed: {e}");
                            }
                        }
                        None => break,
                    }
                }
            }
            if self.phase == Phase::Finished {
                break;
            }
        }
        tracing::info!(pin = %self.pin, "host controller stopped");
    }

    async fn handle_command(&mut self, cmd: HostCommand) -> Result<(), String> {
        match cmd {
            HostCommand::Start => {
                if self.phase != Phase::Waiting {
                    return Err(format!("cannot start from {:?}", self.phase));
                }
                if self.quiz.is_empty() {
                    // PREPARE with nothing to enter QUESTION on would tick
                    // in place forever
                    return Err("quiz has no questions".to_string());
                }
                self.enter_prepare(0).await.map_err(|e| e.to_string())
            }
            HostCommand::SkipQuestion => {
                if self.phase != Phase::Question {
                    return Err(format!("nothing to skip in {:?}", self.phase));
                }
                self.enter_result().await.map_err(|e| e.to_string())
            }
            HostCommand::EndEarly => {
                if self.phase == Phase::Finished {
                    return Err("session already finished".to_string());
                }
                self.finish().await.map_err(|e| e.to_string())
            }
        }
    }

    /// One cooperative second. Decrements the current countdown and performs
    /// the due transition at zero.
    async fn tick_once(&mut self) -> Result<(), SessionError> {
        match self.phase {
            Phase::Prepare | Phase::Question | Phase::Result => {}
            _ => return Ok(()),
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            return Ok(());
        }

        match self.phase {
            Phase::Prepare => self.enter_question().await,
            Phase::Question => self.enter_result().await,
            Phase::Result => {
                let next = self.index + 1;
                if (next as usize) < self.quiz.len() {
                    self.enter_prepare(next).await
                } else {
                    self.finish().await
                }
            }
            _ => Ok(()),
        }
    }

    async fn observe_participants(&mut self, snapshot: Option<Value>) -> Result<(), SessionError> {
        let count = snapshot
            .as_ref()
            .and_then(Value::as_object)
            .map(|m| m.len())
            .unwrap_or(0);

        if count > 0 {
            self.seen_participant = true;
        } else if self.seen_participant && self.phase != Phase::Finished {
            tracing::info!(pin = %self.pin, "all participants left, finishing session");
            self.finish().await?;
        }
        Ok(())
    }

    async fn enter_prepare(&mut self, index: u32) -> Result<(), SessionError> {
        self.set_phase(Phase::Prepare, index).await?;
        self.remaining = self.timing.prepare_seconds_for(index);
        Ok(())
    }

    async fn enter_question(&mut self) -> Result<(), SessionError> {
        self.set_phase(Phase::Question, self.index).await?;
        let kind = self
            .quiz
            .get(self.index as usize)
            .map(Question::kind)
            .ok_or(SessionError::StaleSnapshot {
                index: self.index,
                snapshot_len: self.quiz.len(),
            })?;
        self.remaining = match self.time_limits.get(&kind) {
            Some(limit) => *limit,
            None => {
                tracing::warn!(pin = %self.pin, ?kind, "no time limit configured, using default");
                TimingConfig::DEFAULT_QUESTION_SECONDS
            }
        };
        Ok(())
    }

    async fn enter_result(&mut self) -> Result<(), SessionError> {
        self.set_phase(Phase::Result, self.index).await?;
        self.remaining = self.timing.result_seconds;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), SessionError> {
        self.set_phase(Phase::Finished, self.index).await
    }

    /// The transition write: a single field merge carrying phase and index.
    async fn set_phase(&mut self, to: Phase, index: u32) -> Result<(), SessionError> {
        debug_assert!(index >= self.index, "question index must not go backwards");
        if !is_valid_transition(self.phase, to) {
            tracing::error!(
                pin = %self.pin,
                "invalid phase transition from {:?} to {:?}",
                self.phase,
                to
            );
            return Ok(());
        }

        self.store
            .write(
                &paths::room(&self.pin),
                json!({
                    "phase": serde_json::to_value(to)?,
                    "currentQuestionIndex": index,
                }),
            )
            .await?;
        tracing::info!(pin = %self.pin, from = ?self.phase, to = ?to, index, "phase transition");
        self.phase = to;
        self.index = index;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Statement;

    fn quiz() -> Vec<Question> {
        vec![
            Question::SingleChoice {
                id: "q0".into(),
                prompt: "2+2?".into(),
                choices: vec![],
                correct_index: 1,
                image_url: None,
            },
            Question::MultiTruth {
                id: "q1".into(),
                prompt: "judge these".into(),
                statements: vec![Statement {
                    text: "s".into(),
                    expected: true,
                }],
            },
        ]
    }

    fn limits() -> HashMap<QuestionKind, u32> {
        let mut m = HashMap::new();
        m.insert(QuestionKind::SingleChoice, 20);
        m.insert(QuestionKind::MultiTruth, 40);
        m.insert(QuestionKind::ShortAnswer, 30);
        m
    }

    async fn setup() -> (MemoryStore, HostController, HostHandle, Pin) {
        let store = MemoryStore::new();
        let client = store.client();
        let pin = create_room(&client, SessionMode::Lockstep, quiz(), limits(), None)
            .await
            .unwrap();
        let (controller, handle) =
            HostController::attach(Arc::new(store.client()), pin.clone(), TimingConfig::default())
                .await
                .unwrap();
        (store, controller, handle, pin)
    }

    async fn phase_in_store(store: &MemoryStore, pin: &Pin) -> Value {
        store
            .client()
            .read(&paths::phase(pin))
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn transition_table() {
        use Phase::*;
        assert!(is_valid_transition(Waiting, Prepare));
        assert!(is_valid_transition(Prepare, Question));
        assert!(is_valid_transition(Question, Result));
        assert!(is_valid_transition(Result, Prepare));
        assert!(is_valid_transition(Result, Finished));
        assert!(is_valid_transition(Waiting, Finished));
        assert!(is_valid_transition(Question, Finished));

        assert!(!is_valid_transition(Waiting, Question));
        assert!(!is_valid_transition(Prepare, Result));
        assert!(!is_valid_transition(Question, Prepare));
        assert!(!is_valid_transition(Finished, Prepare));
        assert!(!is_valid_transition(Finished, Finished));
    }

    #[tokio::test]
    async fn start_enters_prepare_with_long_first_countdown() {
        let (store, mut controller, _handle, pin) = setup().await;

        controller.handle_command(HostCommand::Start).await.unwrap();
        assert_eq!(controller.phase(), Phase::Prepare);
        assert_eq!(controller.question_index(), 0);
        assert_eq!(
            controller.remaining,
            TimingConfig::default().first_prepare_seconds
        );
        assert_eq!(phase_in_store(&store, &pin).await, "PREPARE");
    }

    #[tokio::test]
    async fn start_rejected_for_empty_quiz() {
        let store = MemoryStore::new();
        let client = store.client();
        let pin = create_room(&client, SessionMode::Lockstep, Vec::new(), limits(), None)
            .await
            .unwrap();
        let (mut controller, _handle) =
            HostController::attach(Arc::new(store.client()), pin, TimingConfig::default())
                .await
                .unwrap();

        let err = controller
            .handle_command(HostCommand::Start)
            .await
            .unwrap_err();
        assert!(err.contains("no questions"));
        assert_eq!(controller.phase(), Phase::Waiting);
    }

    #[tokio::test]
    async fn start_rejected_outside_waiting() {
        let (_store, mut controller, _handle, _pin) = setup().await;
        controller.handle_command(HostCommand::Start).await.unwrap();
        let err = controller
            .handle_command(HostCommand::Start)
            .await
            .unwrap_err();
        assert!(err.contains("cannot start"));
    }

    #[tokio::test]
    async fn prepare_counts_down_into_question_with_per_kind_limit() {
        let (store, mut controller, _handle, pin) = setup().await;
        controller.handle_command(HostCommand::Start).await.unwrap();

        for _ in 0..TimingConfig::default().first_prepare_seconds {
            controller.tick_once().await.unwrap();
        }
        assert_eq!(controller.phase(), Phase::Question);
        // question 0 is single-choice: 20s
        assert_eq!(controller.remaining, 20);
        assert_eq!(phase_in_store(&store, &pin).await, "QUESTION");
    }

    #[tokio::test]
    async fn skip_jumps_straight_to_result() {
        let (store, mut controller, _handle, pin) = setup().await;
        controller.handle_command(HostCommand::Start).await.unwrap();
        for _ in 0..TimingConfig::default().first_prepare_seconds {
            controller.tick_once().await.unwrap();
        }

        controller
            .handle_command(HostCommand::SkipQuestion)
            .await
            .unwrap();
        assert_eq!(controller.phase(), Phase::Result);
        assert_eq!(phase_in_store(&store, &pin).await, "RESULT");
    }

    #[tokio::test]
    async fn result_advances_index_or_finishes() {
        let (_store, mut controller, _handle, _pin) = setup().await;
        controller.handle_command(HostCommand::Start).await.unwrap();

        // drain PREPARE, QUESTION, RESULT for question 0
        for _ in 0..TimingConfig::default().first_prepare_seconds {
            controller.tick_once().await.unwrap();
        }
        for _ in 0..20 {
            controller.tick_once().await.unwrap();
        }
        for _ in 0..TimingConfig::default().result_seconds {
            controller.tick_once().await.unwrap();
        }
        assert_eq!(controller.phase(), Phase::Prepare);
        assert_eq!(controller.question_index(), 1);

        // question 1 is the last one: drain through to FINISHED
        for _ in 0..TimingConfig::default().prepare_seconds {
            controller.tick_once().await.unwrap();
        }
        for _ in 0..40 {
            controller.tick_once().await.unwrap();
        }
        for _ in 0..TimingConfig::default().result_seconds {
            controller.tick_once().await.unwrap();
        }
        assert_eq!(controller.phase(), Phase::Finished);
    }

    #[tokio::test]
    async fn end_early_finishes_from_any_active_state() {
        let (store, mut controller, _handle, pin) = setup().await;
        controller.handle_command(HostCommand::Start).await.unwrap();
        controller
            .handle_command(HostCommand::EndEarly)
            .await
            .unwrap();
        assert_eq!(controller.phase(), Phase::Finished);
        assert_eq!(phase_in_store(&store, &pin).await, "FINISHED");

        let err = controller
            .handle_command(HostCommand::EndEarly)
            .await
            .unwrap_err();
        assert!(err.contains("already finished"));
    }

    #[tokio::test]
    async fn emptied_room_finishes_session() {
        let (_store, mut controller, _handle, _pin) = setup().await;
        controller.handle_command(HostCommand::Start).await.unwrap();

        controller
            .observe_participants(Some(json!({"p1": {"displayName": "Ada"}})))
            .await
            .unwrap();
        assert_eq!(controller.phase(), Phase::Prepare);

        controller.observe_participants(None).await.unwrap();
        assert_eq!(controller.phase(), Phase::Finished);
    }

    #[tokio::test]
    async fn never_joined_room_keeps_waiting() {
        let (_store, mut controller, _handle, _pin) = setup().await;
        controller.observe_participants(None).await.unwrap();
        assert_eq!(controller.phase(), Phase::Waiting);
    }
}
