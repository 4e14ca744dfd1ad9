//! In-process reference implementation of [`RoomStore`].
//!
//! One shared JSON tree behind a tokio `RwLock`, per-path notifier channels,
//! and per-client disconnect registries. Transactions hold the tree's write
//! lock across read-modify-write, which gives the same observable guarantee
//! as an optimistic-retry backend: the update function sees the committed
//! value and no concurrent transaction interleaves.

use super::{RoomStore, Subscription, TxnOutcome, TxnUpdate};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};

struct Subscriber {
    path: String,
    tx: mpsc::UnboundedSender<Option<Value>>,
}

struct Inner {
    tree: RwLock<Value>,
    subscribers: RwLock<Vec<Subscriber>>,
    /// client id → paths to delete when that client disconnects
    cleanups: RwLock<std::collections::HashMap<u64, Vec<String>>>,
    offset_tx: watch::Sender<i64>,
    skew_ms: RwLock<i64>,
    next_client_id: AtomicU64,
}

/// Factory for store clients. One `MemoryStore` models one backend; each
/// participant process gets its own [`MemoryStoreClient`] so disconnect
/// cleanup is scoped per connection.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (offset_tx, _) = watch::channel(0i64);
        Self {
            inner: Arc::new(Inner {
                tree: RwLock::new(Value::Object(Map::new())),
                subscribers: RwLock::new(Vec::new()),
                cleanups: RwLock::new(std::collections::HashMap::new()),
                offset_tx,
                skew_ms: RwLock::new(0),
                next_client_id: AtomicU64::new(1),
            }),
        }
    }

    /// Open a new connection to the store.
    pub fn client(&self) -> MemoryStoreClient {
        let id = self.inner.next_client_id.fetch_add(1, Ordering::Relaxed);
        MemoryStoreClient {
            inner: self.inner.clone(),
            id,
        }
    }

    /// Test hook: pretend the server clock runs `skew_ms` ahead of local
    /// time and publish the matching offset on the clock feed.
    pub async fn set_clock_skew(&self, skew_ms: i64) {
        *self.inner.skew_ms.write().await = skew_ms;
        let _ = self.inner.offset_tx.send(skew_ms);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// One client connection. Dropping it does NOT fire disconnect cleanup;
/// call [`MemoryStoreClient::disconnect`] to simulate the connection
/// dropping (tests rely on this being explicit and deterministic).
#[derive(Clone)]
pub struct MemoryStoreClient {
    inner: Arc<Inner>,
    id: u64,
}

fn segments(path: &str) -> Result<Vec<&str>, StoreError> {
    if path.is_empty() || path.split('/').any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(path.split('/').collect())
}

fn value_at<'a>(root: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    let mut cur = root;
    for seg in segs {
        cur = cur.as_object()?.get(*seg)?;
    }
    Some(cur)
}

/// Replace the value at `segs`, creating intermediate objects. `None`
/// deletes the leaf.
fn set_at(root: &mut Value, segs: &[&str], value: Option<Value>) {
    if segs.is_empty() {
        *root = value.unwrap_or(Value::Object(Map::new()));
        return;
    }
    let mut cur = root;
    for seg in &segs[..segs.len() - 1] {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        cur = cur
            .as_object_mut()
            .expect("just coerced to object")
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    let leaf = segs[segs.len() - 1];
    let obj = cur.as_object_mut().expect("just coerced to object");
    match value {
        Some(v) => {
            obj.insert(leaf.to_string(), v);
        }
        None => {
            obj.remove(leaf);
        }
    }
}

/// True if a change at `changed` is visible from a subscription at `sub`:
/// one path is a segment-wise prefix of the other.
fn overlaps(sub: &[&str], changed: &[&str]) -> bool {
    sub.iter()
        .zip(changed.iter())
        .all(|(a, b)| a == b)
}

impl Inner {
    async fn notify(&self, changed: &[&str]) {
        let tree = self.tree.read().await;
        let mut subs = self.subscribers.write().await;
        subs.retain(|s| {
            let sub_segs: Vec<&str> = s.path.split('/').collect();
            if !overlaps(&sub_segs, changed) {
                return !s.tx.is_closed();
            }
            let snapshot = value_at(&tree, &sub_segs).cloned();
            s.tx.send(snapshot).is_ok()
        });
    }

    async fn apply_removals(&self, paths: Vec<String>) {
        for path in paths {
            let Ok(segs) = segments(&path) else { continue };
            {
                let mut tree = self.tree.write().await;
                set_at(&mut tree, &segs, None);
            }
            self.notify(&segs).await;
        }
    }
}

#[async_trait]
impl RoomStore for MemoryStoreClient {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let segs = segments(path)?;
        let tree = self.inner.tree.read().await;
        Ok(value_at(&tree, &segs).cloned())
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let segs = segments(path)?;
        let (tx, rx) = mpsc::unbounded_channel();

        // Snapshot and registration under one tree guard, in notify's lock
        // order. A write committed before the guard shows up in the snapshot;
        // one committed after finds the subscriber registered. Nothing can
        // fall between.
        let tree = self.inner.tree.read().await;
        let mut subs = self.inner.subscribers.write().await;
        let _ = tx.send(value_at(&tree, &segs).cloned());
        subs.push(Subscriber {
            path: path.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn write(&self, path: &str, partial: Value) -> Result<(), StoreError> {
        let segs = segments(path)?;
        {
            let mut tree = self.inner.tree.write().await;
            match partial {
                Value::Null => set_at(&mut tree, &segs, None),
                Value::Object(fields) => {
                    // Field merge: each entry replaces (or deletes) one
                    // child, untouched siblings survive.
                    let needs_merge = value_at(&tree, &segs).map(Value::is_object).unwrap_or(false);
                    if needs_merge {
                        for (k, v) in fields {
                            let mut child: Vec<&str> = segs.clone();
                            child.push(&k);
                            if v.is_null() {
                                set_at(&mut tree, &child, None);
                            } else {
                                set_at(&mut tree, &child, Some(v));
                            }
                        }
                    } else {
                        set_at(&mut tree, &segs, Some(Value::Object(fields)));
                    }
                }
                other => set_at(&mut tree, &segs, Some(other)),
            }
        }
        self.inner.notify(&segs).await;
        Ok(())
    }

    async fn transact(&self, path: &str, update: TxnUpdate<'_>) -> Result<TxnOutcome, StoreError> {
        let segs = segments(path)?;
        let outcome = {
            let mut tree = self.inner.tree.write().await;
            let current = value_at(&tree, &segs).cloned();
            match update(current.as_ref()) {
                Some(proposed) => {
                    set_at(&mut tree, &segs, Some(proposed.clone()));
                    TxnOutcome {
                        committed: true,
                        value: Some(proposed),
                    }
                }
                None => TxnOutcome {
                    committed: false,
                    value: current,
                },
            }
        };
        if outcome.committed {
            self.inner.notify(&segs).await;
        }
        Ok(outcome)
    }

    async fn register_remove_on_disconnect(&self, path: &str) -> Result<(), StoreError> {
        segments(path)?;
        self.inner
            .cleanups
            .write()
            .await
            .entry(self.id)
            .or_default()
            .push(path.to_string());
        Ok(())
    }

    fn clock_offset(&self) -> watch::Receiver<i64> {
        self.inner.offset_tx.subscribe()
    }

    async fn server_now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() + *self.inner.skew_ms.read().await
    }
}

impl MemoryStoreClient {
    /// Simulate this connection dropping: every path registered via
    /// `register_remove_on_disconnect` is removed and subscribers notified.
    pub async fn disconnect(&self) {
        let paths = self
            .inner
            .cleanups
            .write()
            .await
            .remove(&self.id)
            .unwrap_or_default();
        if !paths.is_empty() {
            tracing::debug!(client = self.id, count = paths.len(), "disconnect cleanup");
        }
        self.inner.apply_removals(paths).await;
    }
}
