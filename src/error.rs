use thiserror::Error;

/// Failures at the store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection closed")]
    Closed,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Failures fatal to one client's view of a session. Contention, wrong
/// answers and "too slow" are domain outcomes, not errors, and never
/// appear here.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("room {pin} not found")]
    RoomMissing { pin: String },
    #[error("room {pin} is not joinable in phase {phase:?}")]
    NotJoinable {
        pin: String,
        phase: crate::types::Phase,
    },
    /// Observed a phase/index that cannot be reconciled with the held quiz
    /// snapshot. Recovery is resubscribe-from-scratch, never a guess.
    #[error("stale snapshot: room is at question {index} but snapshot holds {snapshot_len}")]
    StaleSnapshot { index: u32, snapshot_len: usize },
    #[error("malformed room document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failures appending to the persistent-record sink. Always non-fatal to
/// session state.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record sink unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}
