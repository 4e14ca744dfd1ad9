use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque ID types for type safety
pub type Pin = String;
pub type ParticipantId = String;
pub type QuestionId = String;
pub type AttemptId = String;

/// The single room-wide value naming what every participant should
/// currently be doing. Lock-step rooms move through
/// WAITING/PREPARE/QUESTION/RESULT/FINISHED; pool rooms through
/// LOBBY/PLAYING/FINISHED. One field, mode-scoped domain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Waiting,
    Prepare,
    Question,
    Result,
    Lobby,
    Playing,
    Finished,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Host drives everyone through the same question in lock step.
    Lockstep,
    /// Shared countdown, everyone races the same pool individually.
    TimedPool,
    /// Shared countdown, teams contend for a partially shared pool.
    TeamPool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice,
    MultiTruth,
    ShortAnswer,
}

/// One answer option of a single-choice question. Media never affects scoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Choice {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// A statement paired with the truth value the author expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Statement {
    pub text: String,
    pub expected: bool,
}

/// A quiz question, immutable once a session has started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Question {
    SingleChoice {
        id: QuestionId,
        prompt: String,
        choices: Vec<Choice>,
        correct_index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },
    MultiTruth {
        id: QuestionId,
        prompt: String,
        statements: Vec<Statement>,
    },
    ShortAnswer {
        id: QuestionId,
        prompt: String,
        expected: String,
    },
}

impl Question {
    pub fn id(&self) -> &str {
        match self {
            Question::SingleChoice { id, .. }
            | Question::MultiTruth { id, .. }
            | Question::ShortAnswer { id, .. } => id,
        }
    }

    pub fn kind(&self) -> QuestionKind {
        match self {
            Question::SingleChoice { .. } => QuestionKind::SingleChoice,
            Question::MultiTruth { .. } => QuestionKind::MultiTruth,
            Question::ShortAnswer { .. } => QuestionKind::ShortAnswer,
        }
    }
}

/// What a participant actually sent in. Kind-mismatched submissions score
/// zero rather than erroring, so this stays decoupled from `Question`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Submission {
    Choice { index: usize },
    Truths { values: Vec<bool> },
    Text { value: String },
}

/// Per-index entry in a participant's personal answer log.
/// Absent = unattempted; entries are append-only per index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMark {
    Correct,
    Incorrect,
}

/// A participant record, owned by the joining device. Score and answer log
/// are written only by that device (single-writer rule); the record itself
/// is auto-removed by the store on disconnect.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub display_name: String,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub answers: HashMap<u32, AnswerMark>,
    #[serde(default)]
    pub is_finished: bool,
}

/// Write-once record naming the first participant whose correct answer was
/// durably accepted for a question. Only ever created through a transaction,
/// never overwritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionLock {
    pub winner_id: ParticipantId,
}

/// The shared room document, keyed by short PIN. Field names serialize in
/// camelCase so paths into the tree store read naturally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub mode: SessionMode,
    pub phase: Phase,
    #[serde(default)]
    pub current_question_index: u32,
    pub quiz_snapshot: Vec<Question>,
    pub per_type_time_limit: HashMap<QuestionKind, u32>,
    #[serde(default)]
    pub view_mode: Option<String>,
    /// Pool modes only: server-clock ms fixing the authoritative end instant.
    #[serde(default)]
    pub start_time: Option<i64>,
    /// Pool modes only: session length in ms.
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub participants: HashMap<ParticipantId, Participant>,
    #[serde(default)]
    pub question_locks: HashMap<u32, QuestionLock>,
}

impl Room {
    pub fn question(&self, index: u32) -> Option<&Question> {
        self.quiz_snapshot.get(index as usize)
    }

    pub fn time_limit_for(&self, kind: QuestionKind) -> Option<u32> {
        self.per_type_time_limit.get(&kind).copied()
    }
}

/// Outcome of a lock-step answer submission. Wrong answers are values,
/// never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    Correct { points: u32 },
    /// Not fully correct. Multi-truth partial ladder credit still lands
    /// here, so the earned points ride along.
    Incorrect { points: u32 },
    /// This index already has an entry in the personal log; the original
    /// outcome stands (idempotent submission).
    AlreadyAnswered,
    /// The local countdown hit zero; submission is locked out regardless of
    /// what the server has confirmed.
    Locked,
}

/// Outcome of a race-claim submission in pool modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Won { points: u32 },
    /// Fully correct, but another participant holds the lock.
    TooSlow,
    /// Not fully correct; the shared lock was never touched and the question
    /// stays contestable by everyone else.
    Incorrect,
    /// Team variant: this team's log already has an entry at the index.
    AlreadyAttempted,
    Locked,
}

/// How a participant's session looked when the room reached FINISHED.
/// Stragglers are surfaced distinctly from normal completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Standing {
    Completed,
    EndedMidAttempt,
}
