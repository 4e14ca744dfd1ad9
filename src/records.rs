//! Persistent-record sink for final results.
//!
//! Appends are fire-and-forget at finalization time: a failed write is
//! logged and dropped, never rolled back into score state.

use crate::error::RecordError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append(&self, collection: &str, record: Value) -> Result<(), RecordError>;
}

/// In-process sink for tests and local play.
#[derive(Default)]
pub struct MemoryRecordSink {
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self, collection: &str) -> Vec<Value> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordSink for MemoryRecordSink {
    async fn append(&self, collection: &str, record: Value) -> Result<(), RecordError> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(record);
        Ok(())
    }
}

/// Sink that always fails, for exercising the non-fatal persistence path.
#[cfg(test)]
pub struct FailingRecordSink;

#[cfg(test)]
#[async_trait]
impl RecordSink for FailingRecordSink {
    async fn append(&self, _collection: &str, _record: Value) -> Result<(), RecordError> {
        Err(RecordError::Unavailable("sink offline".to_string()))
    }
}
