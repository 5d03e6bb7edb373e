//! Message types and status management for the dispatch queue.
//!
//! This module defines the unit of work and its lifecycle states. Messages
//! flow strictly forward through the system and end in exactly one terminal
//! state, which doubles as the delivery audit trail.
//!
//! # Message Lifecycle
//!
//! 1. Messages are created in `Pending` status by the producer interface
//! 2. The dispatch loop claims one message at a time, moving it to `Processing`
//! 3. The claimed message reaches exactly one terminal state: `Sent`,
//!    `Duplicate` (suppressed by the duplicate window) or `Error`
//!
//! Terminal states are final. Messages are never deleted; the table is the
//! system's delivery history.

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

/// Represents the current status of a message in the queue.
///
/// The status transitions only forward:
/// `Pending` -> `Processing` -> `Sent` (delivered)
/// `Pending` -> `Processing` -> `Duplicate` (suppressed, with reason)
/// `Pending` -> `Processing` -> `Error` (failed, with detail)
///
/// The stored representation matches the uppercase column values used by the
/// queue schema.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, strum::Display)]
#[sqlx(type_name = "text")]
pub enum MessageStatus {
    /// Message is waiting to be claimed by the dispatch loop
    #[serde(rename = "pending")]
    #[sqlx(rename = "PENDING")]
    #[strum(serialize = "PENDING")]
    Pending,
    /// Message is the single in-flight delivery
    #[serde(rename = "processing")]
    #[sqlx(rename = "PROCESSING")]
    #[strum(serialize = "PROCESSING")]
    Processing,
    /// Message was accepted by the delivery channel
    #[serde(rename = "sent")]
    #[sqlx(rename = "SENT")]
    #[strum(serialize = "SENT")]
    Sent,
    /// Message was suppressed by the duplicate window
    #[serde(rename = "duplicate")]
    #[sqlx(rename = "DUPLICATE")]
    #[strum(serialize = "DUPLICATE")]
    Duplicate,
    /// Delivery failed; `error_detail` carries the reason
    #[serde(rename = "error")]
    #[sqlx(rename = "ERROR")]
    #[strum(serialize = "ERROR")]
    Error,
}

impl MessageStatus {
    /// True for statuses a message never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Duplicate | Self::Error)
    }
}

/// A queued outbound message.
///
/// `id` is assigned by the store at enqueue time and is unique and immutable.
/// `created_at`/`processed_at` are unix timestamps in seconds; `processed_at`
/// is set if and only if the status is terminal.
#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct Message {
    /// Unique identifier, monotonically increasing per store
    pub id: i64,
    /// Opaque destination identifier
    pub recipient: String,
    /// Text payload; may be empty only when an attachment is present
    pub body: String,
    /// Optional reference to binary content delivered alongside the body
    pub attachment: Option<String>,
    /// Current lifecycle status
    pub status: MessageStatus,
    /// Enqueue time, used for FIFO ordering and the duplicate window
    pub created_at: i64,
    /// Terminal-transition time, null while pending/processing
    pub processed_at: Option<i64>,
    /// Free-text explanation, set only on `Error` or `Duplicate`
    pub error_detail: Option<String>,
    /// Times this message was returned to pending by the crash-recovery sweep
    pub requeues: i64,
}
