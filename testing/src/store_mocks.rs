//! In-memory purchase store with failure injection.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only

use purchase_pipeline_core::purchase_store::{
    PersistenceError, PurchaseRecord, PurchaseStore, UpsertOutcome, sort_for_query,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<Uuid, PurchaseRecord>,
    fail_next_writes: u32,
    unavailable: bool,
    write_attempts: u64,
    write_history: Vec<Uuid>,
}

/// `HashMap`-backed [`PurchaseStore`] for fast, deterministic tests.
///
/// Clones share the same records, so a test can keep one handle for
/// assertions and failure injection while the code under test owns another.
///
/// # Example
///
/// ```
/// use purchase_pipeline_testing::InMemoryPurchaseStore;
///
/// let store = InMemoryPurchaseStore::new();
/// store.fail_next_writes(2);
/// assert!(store.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryPurchaseStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryPurchaseStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with [`PersistenceError::Unavailable`].
    pub fn fail_next_writes(&self, n: u32) {
        self.state.write().unwrap().fail_next_writes = n;
    }

    /// Make every read and write fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unwrap().unavailable = unavailable;
    }

    /// Number of `upsert_idempotent` calls, successful or not.
    #[must_use]
    pub fn write_attempts(&self) -> u64 {
        self.state.read().unwrap().write_attempts
    }

    /// `eventId` of every `upsert_idempotent` call in call order, failed
    /// attempts included.
    #[must_use]
    pub fn write_history(&self) -> Vec<Uuid> {
        self.state.read().unwrap().write_history.clone()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().unwrap().records.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a record by `eventId`.
    #[must_use]
    pub fn get(&self, event_id: Uuid) -> Option<PurchaseRecord> {
        self.state.read().unwrap().records.get(&event_id).cloned()
    }

    /// Seed a record directly, bypassing failure injection.
    pub fn insert(&self, record: PurchaseRecord) {
        self.state
            .write()
            .unwrap()
            .records
            .insert(record.event_id, record);
    }
}

impl PurchaseStore for InMemoryPurchaseStore {
    fn upsert_idempotent(
        &self,
        record: &PurchaseRecord,
    ) -> Pin<Box<dyn Future<Output = Result<UpsertOutcome, PersistenceError>> + Send + '_>> {
        let record = record.clone();

        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            state.write_attempts += 1;
            state.write_history.push(record.event_id);

            if state.unavailable {
                return Err(PersistenceError::Unavailable("store marked unavailable".to_string()));
            }
            if state.fail_next_writes > 0 {
                state.fail_next_writes -= 1;
                return Err(PersistenceError::Unavailable("injected write failure".to_string()));
            }

            Ok(match state.records.insert(record.event_id, record) {
                None => UpsertOutcome::Inserted,
                Some(_) => UpsertOutcome::Replaced,
            })
        })
    }

    fn query_by_user(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PurchaseRecord>, PersistenceError>> + Send + '_>>
    {
        let user_id = user_id.to_string();

        Box::pin(async move {
            let state = self.state.read().unwrap();
            if state.unavailable {
                return Err(PersistenceError::Unavailable("store marked unavailable".to_string()));
            }

            let mut records: Vec<PurchaseRecord> = state
                .records
                .values()
                .filter(|r| r.user_id == user_id)
                .cloned()
                .collect();
            sort_for_query(&mut records);
            Ok(records)
        })
    }
}
