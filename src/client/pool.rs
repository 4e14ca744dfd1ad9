//! Timed-pool clients and host.
//!
//! Everyone races the same question pool against one shared, server-anchored
//! countdown. The question lock is the only field with multiple potential
//! writers, so it is the only field that goes through a transaction; claim
//! outcome, not local scoring, decides who won. The team variant
//! additionally burns an index in the team's own log on every attempt, which
//! feeds the "no legal moves remain" termination rule.

use crate::client::countdown::pool_remaining_ms;
use crate::config::ScoringConfig;
use crate::error::SessionError;
use crate::scoring::score;
use crate::store::{paths, RoomStore, Subscription};
use crate::types::{
    AnswerMark, ClaimOutcome, ParticipantId, Phase, Pin, Question, QuestionLock, Room,
    SessionMode, Standing, Submission,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Player/team client for the pool modes. One instance per participating
/// device; in the team modes the participant record is the team.
pub struct PoolClient {
    store: Arc<dyn RoomStore>,
    pin: Pin,
    id: ParticipantId,
    mode: SessionMode,
    snapshot: Vec<Question>,
    scoring: ScoringConfig,
    /// Pure upside: scales points on a successful claim only. 1 = off.
    multiplier: u32,
    offset_rx: watch::Receiver<i64>,
    phase: Phase,
    start_time: Option<i64>,
    duration: Option<u64>,
    my_score: u32,
    answers: HashMap<u32, AnswerMark>,
    locks: HashMap<u32, QuestionLock>,
    finished: bool,
    room_sub: Subscription,
}

impl PoolClient {
    pub async fn join(
        store: Arc<dyn RoomStore>,
        pin: Pin,
        display_name: String,
        scoring: ScoringConfig,
        multiplier: u32,
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

        let offset_rx = store.clock_offset();
        let room_sub = store.subscribe(&paths::room(&pin)).await?;
        tracing::info!(%pin, participant = %id, mode = ?room.mode, "joined pool session");

        Ok(Self {
            store,
            pin,
            id,
            mode: room.mode,
            snapshot: room.quiz_snapshot,
            scoring,
            multiplier: multiplier.max(1),
            offset_rx,
            phase: room.phase,
            start_time: room.start_time,
            duration: room.duration,
            my_score: 0,
            answers: HashMap::new(),
            locks: room.question_locks,
            finished: false,
            room_sub,
        })
    }

    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn score(&self) -> u32 {
        self.my_score
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Remaining session time at `local_now_ms`, recomputed from the
    /// server-anchored end instant and the live clock offset. `None` until
    /// the host has started the countdown.
    pub fn remaining_ms(&self, local_now_ms: i64) -> Option<u64> {
        let start = self.start_time?;
        let duration = self.duration?;
        Some(pool_remaining_ms(
            start,
            duration,
            local_now_ms,
            *self.offset_rx.borrow(),
        ))
    }

    fn locked_out(&self, local_now_ms: i64) -> bool {
        self.phase != Phase::Playing || self.remaining_ms(local_now_ms).unwrap_or(0) == 0
    }

    /// Wait for the next room notification and fold it in. Re-derives
    /// `isFinished` on every observed change (team mode).
    pub async fn observe(&mut self) -> Result<Option<Phase>, SessionError> {
        match self.room_sub.recv().await {
            Some(snapshot) => {
                self.apply_room_update(snapshot).await?;
                Ok(Some(self.phase))
            }
            None => Ok(None),
        }
    }

    async fn apply_room_update(&mut self, snapshot: Option<Value>) -> Result<(), SessionError> {
        let raw = snapshot.ok_or_else(|| SessionError::RoomMissing {
            pin: self.pin.clone(),
        })?;
        let room: Room = serde_json::from_value(raw)?;

        self.phase = room.phase;
        self.start_time = room.start_time;
        self.duration = room.duration;
        self.locks = room.question_locks;

        if self.mode == SessionMode::TeamPool {
            self.refresh_finished().await?;
        }
        Ok(())
    }

    /// A team is finished once, for every index, either the lock is held by
    /// another team or its own log already has an entry there. The flag
    /// lives in our participant record, so only we write it.
    async fn refresh_finished(&mut self) -> Result<(), SessionError> {
        let finished = (0..self.snapshot.len() as u32).all(|index| {
            self.answers.contains_key(&index)
                || self
                    .locks
                    .get(&index)
                    .is_some_and(|lock| lock.winner_id != self.id)
        });

        if finished != self.finished {
            self.finished = finished;
            let me = paths::participant(&self.pin, &self.id);
            self.store
                .write(&me, json!({ "isFinished": finished }))
                .await?;
            tracing::info!(pin = %self.pin, participant = %self.id, finished, "finish state changed");
        }
        Ok(())
    }

    /// Answer question `index`. A fully correct submission contends for the
    /// write-once lock; an incorrect one never touches it, so the question
    /// stays contestable for everyone else.
    pub async fn submit(
        &mut self,
        index: u32,
        submission: Submission,
        local_now_ms: i64,
    ) -> Result<ClaimOutcome, SessionError> {
        if self.locked_out(local_now_ms) {
            return Ok(ClaimOutcome::Locked);
        }
        if self.mode == SessionMode::TeamPool && self.answers.contains_key(&index) {
            return Ok(ClaimOutcome::AlreadyAttempted);
        }
        if self
            .locks
            .get(&index)
            .is_some_and(|lock| lock.winner_id == self.id)
        {
            return Ok(ClaimOutcome::AlreadyAttempted);
        }
        let question = self
            .snapshot
            .get(index as usize)
            .ok_or(SessionError::StaleSnapshot {
                index,
                snapshot_len: self.snapshot.len(),
            })?;

        let verdict = score(question, &submission, &self.scoring);
        if !verdict.is_fully_correct {
            if self.mode == SessionMode::TeamPool {
                // Burn the index for this team; the shared lock stays
                // untouched. A wrong guess under a multiplier forfeits no
                // extra points, only the opportunity.
                self.mark_answer(index, AnswerMark::Incorrect).await?;
            }
            return Ok(ClaimOutcome::Incorrect);
        }

        // Race-claim commit: propose only if unclaimed, abort otherwise.
        let proposal = serde_json::to_value(QuestionLock {
            winner_id: self.id.clone(),
        })?;
        let outcome = self
            .store
            .transact(&paths::question_lock(&self.pin, index), &move |current| {
                if current.is_some() {
                    None
                } else {
                    Some(proposal.clone())
                }
            })
            .await?;

        if self.mode == SessionMode::TeamPool {
            // Correct either way; bars this team from retrying the index.
            // Never overwrites the shared lock.
            self.mark_answer(index, AnswerMark::Correct).await?;
        }

        if !outcome.committed {
            tracing::debug!(pin = %self.pin, participant = %self.id, index, "lost the race");
            return Ok(ClaimOutcome::TooSlow);
        }

        self.locks.insert(
            index,
            QuestionLock {
                winner_id: self.id.clone(),
            },
        );
        let points = verdict.points * self.multiplier;
        self.my_score += points;
        let me = paths::participant(&self.pin, &self.id);
        self.store
            .write(&me, json!({ "score": self.my_score }))
            .await?;

        Ok(ClaimOutcome::Won { points })
    }

    async fn mark_answer(&mut self, index: u32, mark: AnswerMark) -> Result<(), SessionError> {
        self.answers.insert(index, mark);
        let me = paths::participant(&self.pin, &self.id);
        self.store
            .write(
                &format!("{me}/answers"),
                json!({ index.to_string(): serde_json::to_value(mark)? }),
            )
            .await?;
        self.refresh_finished().await
    }
}

/// Session FINISHED rule for the shared-pool team mode. Two finished teams
/// are enough on purpose; waiting for all would hang the session on one
/// straggler.
pub fn session_complete(room: &Room) -> bool {
    let teams = room.participants.len();
    let finished = room
        .participants
        .values()
        .filter(|p| p.is_finished)
        .count();
    match teams {
        0 => false,
        1 => finished == 1,
        _ => finished >= 2,
    }
}

/// Per-participant standing once the room reached FINISHED. Stragglers are
/// labeled distinctly from normal completion, never as if they finished.
pub fn standings(room: &Room) -> HashMap<ParticipantId, Standing> {
    room.participants
        .iter()
        .map(|(id, p)| {
            let standing = if p.is_finished {
                Standing::Completed
            } else {
                Standing::EndedMidAttempt
            };
            (id.clone(), standing)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolHostCommand {
    /// LOBBY → PLAYING: anchors `startTime` on the server clock.
    Start,
    /// Any active state → FINISHED.
    End,
}

#[derive(Clone)]
pub struct PoolHostHandle {
    tx: mpsc::UnboundedSender<PoolHostCommand>,
}

impl PoolHostHandle {
    pub fn start(&self) -> Result<(), String> {
        self.send(PoolHostCommand::Start)
    }

    pub fn end(&self) -> Result<(), String> {
        self.send(PoolHostCommand::End)
    }

    fn send(&self, cmd: PoolHostCommand) -> Result<(), String> {
        self.tx
            .send(cmd)
            .map_err(|_| "pool host has stopped".to_string())
    }
}

/// Host process for the pool modes. Owns `phase` (single-writer rule) and
/// applies the termination rule and the global time limit; clients only
/// derive their own `isFinished`.
pub struct PoolHost {
    store: Arc<dyn RoomStore>,
    pin: Pin,
    duration_ms: u64,
    phase: Phase,
    commands: mpsc::UnboundedReceiver<PoolHostCommand>,
    room_sub: Subscription,
}

impl PoolHost {
    pub async fn attach(
        store: Arc<dyn RoomStore>,
        pin: Pin,
        duration_ms: u64,
    ) -> Result<(Self, PoolHostHandle), SessionError> {
        let raw = store
            .read(&paths::room(&pin))
            .await?
            .ok_or_else(|| SessionError::RoomMissing { pin: pin.clone() })?;
        let room: Room = serde_json::from_value(raw)?;

        let room_sub = store.subscribe(&paths::room(&pin)).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                store,
                pin,
                duration_ms,
                phase: room.phase,
                commands: rx,
                room_sub,
            },
            PoolHostHandle { tx },
        ))
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.check_time_expiry().await {
                        tracing::error!(pin = %self.pin, "time check failed: {e}");
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
                snap = self.room_sub.recv() => {
                    match snap {
                        Some(snap) => {
                            if let Err(e) = self.observe_room(snap).await {
                                tracing::error!(pin = %self.pin, "room watch failed: {e}");
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
        tracing::info!(pin = %self.pin, "pool host stopped");
    }

    async fn handle_command(&mut self, cmd: PoolHostCommand) -> Result<(), String> {
        match cmd {
            PoolHostCommand::Start => {
                if self.phase != Phase::Lobby {
                    return Err(format!("cannot start from {:?}", self.phase));
                }
                self.start().await.map_err(|e| e.to_string())
            }
            PoolHostCommand::End => {
                if self.phase == Phase::Finished {
                    return Err("session already finished".to_string());
                }
                self.finish("host ended the session").await.map_err(|e| e.to_string())
            }
        }
    }

    /// Anchor the end instant on the server clock so every client computes
    /// the same deadline regardless of its local clock.
    async fn start(&mut self) -> Result<(), SessionError> {
        let start_time = self.store.server_now_ms().await;
        self.store
            .write(
                &paths::room(&self.pin),
                json!({
                    "phase": "PLAYING",
                    "startTime": start_time,
                    "duration": self.duration_ms,
                }),
            )
            .await?;
        self.phase = Phase::Playing;
        tracing::info!(pin = %self.pin, start_time, duration = self.duration_ms, "pool session started");
        Ok(())
    }

    async fn check_time_expiry(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::Playing {
            return Ok(());
        }
        let raw = self.store.read(&paths::room(&self.pin)).await?;
        let Some(raw) = raw else { return Ok(()) };
        let room: Room = serde_json::from_value(raw)?;
        if let (Some(start), Some(duration)) = (room.start_time, room.duration) {
            if self.store.server_now_ms().await >= start + duration as i64 {
                self.finish("time expired").await?;
            }
        }
        Ok(())
    }

    async fn observe_room(&mut self, snapshot: Option<Value>) -> Result<(), SessionError> {
        let Some(raw) = snapshot else { return Ok(()) };
        let room: Room = serde_json::from_value(raw)?;

        if self.phase != Phase::Playing || room.phase != Phase::Playing {
            self.phase = room.phase;
            return Ok(());
        }

        if room.mode == SessionMode::TeamPool && session_complete(&room) {
            for (id, standing) in standings(&room) {
                if standing == Standing::EndedMidAttempt {
                    tracing::warn!(pin = %self.pin, participant = %id, "ended mid-attempt");
                }
            }
            self.finish("no legal moves remain").await?;
        }
        Ok(())
    }

    async fn finish(&mut self, reason: &str) -> Result<(), SessionError> {
        self.store
            .write(&paths::room(&self.pin), json!({ "phase": "FINISHED" }))
            .await?;
        self.phase = Phase::Finished;
        tracing::info!(pin = %self.pin, reason, "pool session finished");
        Ok(())
    }
}
