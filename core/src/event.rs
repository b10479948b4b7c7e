//! Purchase event schema and validation.
//!
//! This module defines the wire contract shared by the producer and the consumer.
//! A [`PurchaseEvent`] is immutable once published and is identified by its
//! `eventId`, which doubles as the idempotency key on the consumer side.
//!
//! # Wire Format
//!
//! Events travel as JSON objects with camelCase field names:
//!
//! ```json
//! {
//!   "eventId": "5f0c6a1e-8d4e-4f0b-9a57-0c7b6f1d2e3a",
//!   "eventType": "PurchaseCreated",
//!   "eventVersion": 1,
//!   "timestamp": "2025-01-01T00:00:00Z",
//!   "userId": "u1",
//!   "itemId": "i99",
//!   "quantity": 2
//! }
//! ```
//!
//! The log may contain payloads written by older or foreign producers, so the
//! consumer never deserializes blindly: every payload goes through [`validate`],
//! which either yields a well-formed event or a [`ValidationError`] describing
//! why the payload was rejected.
//!
//! # Example
//!
//! ```
//! use purchase_pipeline_core::event::{validate, PurchaseEvent};
//! use purchase_pipeline_core::environment::SystemClock;
//!
//! let event = PurchaseEvent::new(&SystemClock, "u1", "i99", 2).unwrap();
//! let payload = event.to_payload().unwrap();
//!
//! let decoded = validate(&payload).unwrap();
//! assert_eq!(decoded, event);
//! ```

use crate::environment::Clock;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// The only event type this pipeline understands.
pub const PURCHASE_CREATED: &str = "PurchaseCreated";

/// Schema version stamped on newly created events.
pub const CURRENT_EVENT_VERSION: u32 = 1;

/// Schema versions the consumer accepts.
pub const SUPPORTED_EVENT_VERSIONS: &[u32] = &[CURRENT_EVENT_VERSION];

/// A payload that failed schema validation.
///
/// Carries the offending payload (decoded lossily so it can always be logged)
/// together with a human-readable reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid purchase event: {reason}")]
pub struct ValidationError {
    /// Why the payload was rejected
    pub reason: String,
    /// The raw payload as received
    pub raw: String,
}

impl ValidationError {
    fn new(reason: impl Into<String>, raw: &[u8]) -> Self {
        Self {
            reason: reason.into(),
            raw: String::from_utf8_lossy(raw).into_owned(),
        }
    }
}

/// A purchase event as it appears on the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseEvent {
    /// Globally unique identifier, generated once by the producer
    pub event_id: Uuid,
    /// Always [`PURCHASE_CREATED`]
    pub event_type: String,
    /// Schema version
    pub event_version: u32,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Purchasing user
    pub user_id: String,
    /// Purchased item
    pub item_id: String,
    /// Number of items, at least 1
    pub quantity: u32,
}

impl PurchaseEvent {
    /// Mint a new event with a fresh `eventId` and the clock's current time.
    ///
    /// # Errors
    ///
    /// Returns a [`FieldError`] if an identifier is blank or `quantity` is not positive.
    pub fn new(
        clock: &dyn Clock,
        user_id: &str,
        item_id: &str,
        quantity: i64,
    ) -> Result<Self, FieldError> {
        let quantity = check_purchase_fields(user_id, item_id, quantity)?;

        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type: PURCHASE_CREATED.to_string(),
            event_version: CURRENT_EVENT_VERSION,
            timestamp: clock.now(),
            user_id: user_id.to_string(),
            item_id: item_id.to_string(),
            quantity,
        })
    }

    /// Serialize to the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error. This does not happen for
    /// events built through [`PurchaseEvent::new`] or [`validate`].
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Key used to route the event to a partition.
    ///
    /// All purchases of one user land on the same partition, which keeps
    /// their relative order.
    #[must_use]
    pub fn partition_key(&self) -> &str {
        &self.user_id
    }
}

impl fmt::Display for PurchaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {{ id: {}, user: {}, item: {}, quantity: {} }}",
            self.event_type, self.event_id, self.user_id, self.item_id, self.quantity
        )
    }
}

/// A purchase field that violates the schema rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// `userId` is empty or whitespace
    #[error("userId must not be empty")]
    EmptyUserId,

    /// `itemId` is empty or whitespace
    #[error("itemId must not be empty")]
    EmptyItemId,

    /// `quantity` is zero or negative
    #[error("quantity must be >= 1, got {0}")]
    NonPositiveQuantity(i64),

    /// `quantity` does not fit the schema's integer range
    #[error("quantity {0} exceeds the maximum of {max}", max = u32::MAX)]
    QuantityTooLarge(i64),
}

/// Check the purchase fields shared by the producer boundary and the consumer.
///
/// Returns the quantity narrowed to the schema's integer type.
///
/// # Errors
///
/// Returns the first [`FieldError`] found, checking `userId`, `itemId`,
/// then `quantity`.
pub fn check_purchase_fields(
    user_id: &str,
    item_id: &str,
    quantity: i64,
) -> Result<u32, FieldError> {
    if user_id.trim().is_empty() {
        return Err(FieldError::EmptyUserId);
    }
    if item_id.trim().is_empty() {
        return Err(FieldError::EmptyItemId);
    }
    if quantity < 1 {
        return Err(FieldError::NonPositiveQuantity(quantity));
    }
    u32::try_from(quantity).map_err(|_| FieldError::QuantityTooLarge(quantity))
}

/// Shape of a payload before the semantic checks run.
///
/// Every field is required. Unknown extra fields are ignored so that newer
/// producers can add optional data without breaking this consumer.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePurchaseEvent {
    event_id: Uuid,
    event_type: String,
    event_version: u32,
    timestamp: DateTime<FixedOffset>,
    user_id: String,
    item_id: String,
    quantity: i64,
}

/// Validate a raw payload from the log.
///
/// A payload is accepted only if it is UTF-8 JSON carrying every required
/// field with the right type, the expected `eventType`, a supported
/// `eventVersion`, non-empty identifiers and a positive `quantity`.
///
/// # Errors
///
/// Returns a [`ValidationError`] with the payload and the reason for any
/// other shape: undecodable bytes, a missing or mistyped field, an unknown
/// type or version, or a field rule violation.
pub fn validate(raw: &[u8]) -> Result<PurchaseEvent, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::new("payload is empty", raw));
    }
    if std::str::from_utf8(raw).is_err() {
        return Err(ValidationError::new("payload is not valid UTF-8", raw));
    }

    let wire: WirePurchaseEvent = serde_json::from_slice(raw)
        .map_err(|e| ValidationError::new(format!("malformed event: {e}"), raw))?;

    if wire.event_type != PURCHASE_CREATED {
        return Err(ValidationError::new(
            format!(
                "unexpected eventType '{}', expected '{PURCHASE_CREATED}'",
                wire.event_type
            ),
            raw,
        ));
    }
    if !SUPPORTED_EVENT_VERSIONS.contains(&wire.event_version) {
        return Err(ValidationError::new(
            format!(
                "unsupported eventVersion {}, supported: {SUPPORTED_EVENT_VERSIONS:?}",
                wire.event_version
            ),
            raw,
        ));
    }

    let quantity = check_purchase_fields(&wire.user_id, &wire.item_id, wire.quantity)
        .map_err(|e| ValidationError::new(e.to_string(), raw))?;

    Ok(PurchaseEvent {
        event_id: wire.event_id,
        event_type: wire.event_type,
        event_version: wire.event_version,
        timestamp: wire.timestamp.with_timezone(&Utc),
        user_id: wire.user_id,
        item_id: wire.item_id,
        quantity,
    })
}
