//! Lock-step player client.
//!
//! Subscribes to one room, derives what it may currently do from the phase
//! the host publishes, reconstructs its own countdown, and submits answers.
//! It only ever writes inside its own participant subtree (score and answer
//! log), which is what makes plain last-writer-wins merges safe.

use crate::client::countdown::LockstepCountdown;
use crate::config::{ScoringConfig, TimingConfig};
use crate::error::SessionError;
use crate::scoring::score;
use crate::store::{paths, RoomStore, Subscription};
use crate::types::{
    AnswerMark, AnswerOutcome, ParticipantId, Phase, Pin, Question, QuestionKind, Room, Submission,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// What the player device should currently render.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerView {
    pub phase: Phase,
    pub question_index: u32,
    pub countdown_seconds: u32,
    pub score: u32,
}

pub struct LockstepPlayer {
    store: Arc<dyn RoomStore>,
    pin: Pin,
    id: ParticipantId,
    snapshot: Vec<Question>,
    time_limits: HashMap<QuestionKind, u32>,
    timing: TimingConfig,
    scoring: ScoringConfig,
    phase: Phase,
    index: u32,
    my_score: u32,
    answers: HashMap<u32, AnswerMark>,
    countdown: LockstepCountdown,
    room_sub: Subscription,
}

impl std::fmt::Debug for LockstepPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockstepPlayer")
            .field("pin", &self.pin)
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("index", &self.index)
            .field("my_score", &self.my_score)
            .finish_non_exhaustive()
    }
}

impl LockstepPlayer {
    /// Join a room: create our participant record, arm its disconnect
    /// cleanup, and start observing.
    pub async fn join(
        store: Arc<dyn RoomStore>,
        pin: Pin,
        display_name: String,
        timing: TimingConfig,
        scoring: ScoringConfig,
    ) -> Result<Self, SessionError> {
        let raw = store
            .read(&paths::room(&pin))
            .await?
            .ok_or_else(|| SessionError::RoomMissing { pin: pin.clone() })?;
        let room: Room = serde_json::from_value(raw)?;

        if room.phase == Phase::Finished {
            return Err(SessionError::NotJoinable {
                pin,
                phase: room.phase,
            });
        }

        let id = ulid::Ulid::new().to_string();
        let me = paths::participant(&pin, &id);
        store
            .write(&me, json!({ "displayName": display_name, "score": 0 }))
            .await?;
        store.register_remove_on_disconnect(&me).await?;

        let room_sub = store.subscribe(&paths::room(&pin)).await?;
        tracing::info!(%pin, participant = %id, "joined lock-step session");

        Ok(Self {
            store,
            pin,
            id,
            snapshot: room.quiz_snapshot,
            time_limits: room.per_type_time_limit,
            timing,
            scoring,
            phase: room.phase,
            index: room.current_question_index,
            my_score: 0,
            answers: HashMap::new(),
            countdown: LockstepCountdown::idle(),
            room_sub,
        })
    }

    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            phase: self.phase,
            question_index: self.index,
            countdown_seconds: self.countdown.remaining(),
            score: self.my_score,
        }
    }

    pub fn current_question(&self) -> Option<&Question> {
        if self.phase == Phase::Question {
            self.snapshot.get(self.index as usize)
        } else {
            None
        }
    }

    /// Wait for the next store notification and fold it into the view.
    /// `None` means the subscription ended (store side went away).
    pub async fn observe(&mut self) -> Result<Option<PlayerView>, SessionError> {
        match self.room_sub.recv().await {
            Some(snapshot) => {
                self.apply_room_update(snapshot)?;
                Ok(Some(self.view()))
            }
            None => Ok(None),
        }
    }

    /// Fold one observed room snapshot into local state. Phase changes
    /// re-seed the local countdown to the nominal duration; there is no
    /// absolute-timestamp correction in this mode.
    fn apply_room_update(&mut self, snapshot: Option<Value>) -> Result<(), SessionError> {
        let raw = snapshot.ok_or_else(|| SessionError::RoomMissing {
            pin: self.pin.clone(),
        })?;
        let room: Room = serde_json::from_value(raw)?;

        let changed = room.phase != self.phase || room.current_question_index != self.index;
        self.phase = room.phase;
        self.index = room.current_question_index;

        // A phase/index we cannot reconcile with our held snapshot is fatal
        // to this client's view; resync() is the only recovery.
        if self.phase == Phase::Question && self.index as usize >= self.snapshot.len() {
            return Err(SessionError::StaleSnapshot {
                index: self.index,
                snapshot_len: self.snapshot.len(),
            });
        }

        if changed {
            let seconds = match self.phase {
                Phase::Prepare => self.timing.prepare_seconds_for(self.index),
                Phase::Question => self
                    .snapshot
                    .get(self.index as usize)
                    .and_then(|q| self.time_limits.get(&q.kind()).copied())
                    // same fallback as the host, so the question stays open
                    // here exactly as long as it does there
                    .unwrap_or(TimingConfig::DEFAULT_QUESTION_SECONDS),
                Phase::Result => self.timing.result_seconds,
                _ => 0,
            };
            self.countdown.reseed(seconds);
        }
        Ok(())
    }

    /// One local second of countdown.
    pub fn tick(&mut self) -> u32 {
        self.countdown.tick()
    }

    /// Submit an answer for the current question. Scoring runs locally for
    /// immediate feedback; the same engine result is what gets persisted, so
    /// both agree by construction. Re-submitting an already answered index
    /// is a no-op (`AlreadyAnswered`).
    pub async fn submit(&mut self, submission: Submission) -> Result<AnswerOutcome, SessionError> {
        if self.phase != Phase::Question || self.countdown.expired() {
            return Ok(AnswerOutcome::Locked);
        }
        if self.answers.contains_key(&self.index) {
            return Ok(AnswerOutcome::AlreadyAnswered);
        }
        let question =
            self.snapshot
                .get(self.index as usize)
                .ok_or(SessionError::StaleSnapshot {
                    index: self.index,
                    snapshot_len: self.snapshot.len(),
                })?;

        let verdict = score(question, &submission, &self.scoring);
        let mark = if verdict.is_fully_correct {
            AnswerMark::Correct
        } else {
            AnswerMark::Incorrect
        };

        self.answers.insert(self.index, mark);
        self.my_score += verdict.points;

        // Two merges inside our own subtree: append the log entry, then
        // bump the score. Nobody else writes here.
        let me = paths::participant(&self.pin, &self.id);
        self.store
            .write(
                &format!("{me}/answers"),
                json!({ self.index.to_string(): serde_json::to_value(mark)? }),
            )
            .await?;
        self.store
            .write(&me, json!({ "score": self.my_score }))
            .await?;

        Ok(if verdict.is_fully_correct {
            AnswerOutcome::Correct {
                points: verdict.points,
            }
        } else {
            AnswerOutcome::Incorrect {
                points: verdict.points,
            }
        })
    }

    /// Resubscribe from scratch: fresh room read (including the snapshot)
    /// and a new subscription. The recovery path for `StaleSnapshot`;
    /// never guess.
    pub async fn resync(&mut self) -> Result<PlayerView, SessionError> {
        let raw = self
            .store
            .read(&paths::room(&self.pin))
            .await?
            .ok_or_else(|| SessionError::RoomMissing {
                pin: self.pin.clone(),
            })?;
        let room: Room = serde_json::from_value(raw)?;

        tracing::warn!(pin = %self.pin, participant = %self.id, "resyncing session view");
        self.snapshot = room.quiz_snapshot;
        self.time_limits = room.per_type_time_limit;
        self.phase = room.phase;
        self.index = room.current_question_index;
        self.countdown = LockstepCountdown::idle();
        if let Some(me) = room.participants.get(&self.id) {
            self.my_score = me.score;
            self.answers = me.answers.clone();
        }
        self.room_sub = self.store.subscribe(&paths::room(&self.pin)).await?;
        Ok(self.view())
    }
}
