//! Persistence of validated purchases.
//!
//! The consumer writes each validated event as a [`PurchaseRecord`] keyed by
//! its `eventId`. Because the log delivers at least once, the same record may
//! be written several times; [`PurchaseStore::upsert_idempotent`] guarantees
//! that repeated writes converge on a single record.

use crate::event::PurchaseEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// A persisted purchase, derived 1:1 from a validated [`PurchaseEvent`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    /// Primary key
    pub event_id: Uuid,
    /// Event type the record was created from
    pub event_type: String,
    /// Schema version the record was created from
    pub event_version: u32,
    /// When the purchase happened
    pub timestamp: DateTime<Utc>,
    /// Grouping key for reads
    pub user_id: String,
    /// Purchased item
    pub item_id: String,
    /// Number of items
    pub quantity: u32,
}

impl From<PurchaseEvent> for PurchaseRecord {
    fn from(event: PurchaseEvent) -> Self {
        Self {
            event_id: event.event_id,
            event_type: event.event_type,
            event_version: event.event_version,
            timestamp: event.timestamp,
            user_id: event.user_id,
            item_id: event.item_id,
            quantity: event.quantity,
        }
    }
}

/// Result of an idempotent write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First write for this `eventId`
    Inserted,
    /// A record with this `eventId` already existed and was overwritten
    Replaced,
}

/// Errors from the persistence backend.
#[derive(Error, Debug, Clone)]
pub enum PersistenceError {
    /// Storage could not be reached
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The operation did not complete in time
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),

    /// Storage rejected the operation
    #[error("Database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back to a record
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The store settings themselves are invalid; retrying cannot help
    #[error("Storage misconfigured: {0}")]
    Misconfigured(String),
}

impl PersistenceError {
    /// Whether trying the same operation again may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Misconfigured(_))
    }
}

/// Sort records the way every [`PurchaseStore`] returns them: newest first,
/// ties broken by ascending `eventId`.
pub fn sort_for_query(records: &mut [PurchaseRecord]) {
    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
}

/// Document store for purchase records.
///
/// # Thread Safety
///
/// Shared between the consumer loop and the read endpoint, so implementations
/// must be `Send + Sync`.
pub trait PurchaseStore: Send + Sync {
    /// Insert the record, or replace an existing record with the same `eventId`.
    ///
    /// Applying the same record any number of times leaves exactly one record.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`] if the write did not happen. The caller
    /// must treat the record as not persisted.
    fn upsert_idempotent(
        &self,
        record: &PurchaseRecord,
    ) -> Pin<Box<dyn Future<Output = Result<UpsertOutcome, PersistenceError>> + Send + '_>>;

    /// All records for a user, newest first (see [`sort_for_query`]).
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`] if the query could not be served.
    fn query_by_user(
        &self,
        user_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PurchaseRecord>, PersistenceError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(id: u128, timestamp: &str) -> PurchaseRecord {
        PurchaseRecord {
            event_id: Uuid::from_u128(id),
            event_type: "PurchaseCreated".to_string(),
            event_version: 1,
            timestamp: DateTime::parse_from_rfc3339(timestamp).unwrap().with_timezone(&Utc),
            user_id: "u1".to_string(),
            item_id: "i1".to_string(),
            quantity: 1,
        }
    }

    #[test]
    fn query_order_is_newest_first_then_event_id() {
        let mut records = vec![
            record(3, "2025-01-01T00:00:00Z"),
            record(2, "2025-01-02T00:00:00Z"),
            record(1, "2025-01-01T00:00:00Z"),
        ];

        sort_for_query(&mut records);

        let ids: Vec<u128> = records.iter().map(|r| r.event_id.as_u128()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn record_serializes_with_wire_field_names() {
        let json = serde_json::to_value(record(1, "2025-01-01T00:00:00Z")).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["itemId"], "i1");
        assert_eq!(json["quantity"], 1);
        assert!(json.get("eventId").is_some());
    }
}
