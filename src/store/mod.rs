//! Consumption boundary for the shared, subscribable, tree-shaped store.
//!
//! Every coordination primitive this crate relies on goes through
//! [`RoomStore`]: one-shot reads, continuous subscriptions, field-merge
//! writes, the compare-and-swap transaction behind question locks,
//! disconnect-triggered cleanup and the server clock feed. The in-process
//! [`memory::MemoryStore`] implements it for tests and local play; a real
//! deployment substitutes a networked backend behind the same trait.

mod memory;

pub use memory::{MemoryStore, MemoryStoreClient};

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

/// Result of a transaction attempt on a sub-path.
#[derive(Debug, Clone)]
pub struct TxnOutcome {
    /// Whether this caller's proposal was committed.
    pub committed: bool,
    /// The value at the path after the attempt (the winner's value when
    /// `committed` is false).
    pub value: Option<Value>,
}

/// Update function for [`RoomStore::transact`]: receives the current value
/// (or `None` if absent) and returns the proposed replacement, or `None` to
/// abort without mutation.
pub type TxnUpdate<'a> = &'a (dyn Fn(Option<&Value>) -> Option<Value> + Send + Sync);

/// A live subscription: the initial snapshot followed by every subsequent
/// value at the path. Unsubscribe by dropping the receiver.
pub type Subscription = mpsc::UnboundedReceiver<Option<Value>>;

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// One-shot read of the value at `path`.
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Subscribe to `path`. Delivers the current value immediately, then a
    /// fresh snapshot whenever anything at or under the path changes.
    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError>;

    /// Merge `partial` into the value at `path`. Object values merge field
    /// by field (last writer wins per field); `Value::Null` deletes the
    /// path; anything else replaces it.
    async fn write(&self, path: &str, partial: Value) -> Result<(), StoreError>;

    /// Atomic read-modify-write on `path`. The store guarantees the update
    /// function sees the committed current value and that no concurrent
    /// transaction interleaves; a `None` return aborts without mutation.
    async fn transact(&self, path: &str, update: TxnUpdate<'_>) -> Result<TxnOutcome, StoreError>;

    /// Register `path` for automatic removal when this client's connection
    /// drops. Self-heals the participant list on network loss.
    async fn register_remove_on_disconnect(&self, path: &str) -> Result<(), StoreError>;

    /// Continuous feed of the measured delta between the store's clock and
    /// this client's local clock, in milliseconds (server − local).
    fn clock_offset(&self) -> watch::Receiver<i64>;

    /// Current time on the store's authoritative clock, in ms.
    async fn server_now_ms(&self) -> i64;
}

/// Typed paths into the room tree, so callers never hand-assemble strings.
pub mod paths {
    use crate::types::Pin;

    pub fn room(pin: &Pin) -> String {
        format!("rooms/{pin}")
    }

    pub fn phase(pin: &Pin) -> String {
        format!("rooms/{pin}/phase")
    }

    pub fn participants(pin: &Pin) -> String {
        format!("rooms/{pin}/participants")
    }

    pub fn participant(pin: &Pin, id: &str) -> String {
        format!("rooms/{pin}/participants/{id}")
    }

    pub fn question_locks(pin: &Pin) -> String {
        format!("rooms/{pin}/questionLocks")
    }

    pub fn question_lock(pin: &Pin, index: u32) -> String {
        format!("rooms/{pin}/questionLocks/{index}")
    }
}
