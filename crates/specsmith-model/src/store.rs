use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::{ClarificationRecord, GenerationRecord, RequestRecord};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordStoreError {
    /// The store refused this record
    #[error("Record rejected: {0}")]
    Rejected(String),

    /// The store could not be reached
    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}

/// Destination for finalized results.
///
/// Records are appended and keyed by the entity's own id. The core only
/// writes; it never reads back.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn record_expectations(&self, record: &ClarificationRecord)
    -> Result<(), RecordStoreError>;

    async fn record_generation(&self, record: &GenerationRecord) -> Result<(), RecordStoreError>;

    /// Router request history. Stores that do not keep it can ignore it.
    async fn record_requests(&self, _entries: &[RequestRecord]) -> Result<(), RecordStoreError> {
        Ok(())
    }
}

/// Process-local [`RecordStore`], used by the CLI and by tests
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    expectations: Mutex<Vec<ClarificationRecord>>,
    generations: Mutex<Vec<GenerationRecord>>,
    requests: Mutex<Vec<RequestRecord>>,
    rejecting: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with [`RecordStoreError::Unavailable`]
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RecordStoreError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(RecordStoreError::Unavailable("store is rejecting writes".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn expectations(&self) -> Vec<ClarificationRecord> {
        lock(&self.expectations).clone()
    }

    #[must_use]
    pub fn generations(&self) -> Vec<GenerationRecord> {
        lock(&self.generations).clone()
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RequestRecord> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn record_expectations(
        &self,
        record: &ClarificationRecord,
    ) -> Result<(), RecordStoreError> {
        self.check()?;
        lock(&self.expectations).push(record.clone());
        Ok(())
    }

    async fn record_generation(&self, record: &GenerationRecord) -> Result<(), RecordStoreError> {
        self.check()?;
        lock(&self.generations).push(record.clone());
        Ok(())
    }

    async fn record_requests(&self, entries: &[RequestRecord]) -> Result<(), RecordStoreError> {
        self.check()?;
        lock(&self.requests).extend_from_slice(entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClarificationMetadata, Expectation};
    use chrono::Utc;

    fn record(id: &str) -> ClarificationRecord {
        ClarificationRecord {
            conversation_id: id.to_string(),
            top: Expectation::new_top("Todo App", "Manage tasks"),
            subs: vec![],
            metadata: ClarificationMetadata {
                rounds: 1,
                questions_asked: 0,
                source_text: "I need a todo app".to_string(),
                completed_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_appends_records() {
        let store = InMemoryRecordStore::new();
        store.record_expectations(&record("a")).await.unwrap();
        store.record_expectations(&record("b")).await.unwrap();

        let ids: Vec<_> = store
            .expectations()
            .into_iter()
            .map(|r| r.conversation_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_rejecting_store_fails_writes() {
        let store = InMemoryRecordStore::new();
        store.set_rejecting(true);
        let err = store.record_expectations(&record("a")).await.unwrap_err();
        assert!(matches!(err, RecordStoreError::Unavailable(_)));
        assert!(store.expectations().is_empty());
    }
}
