//! Delivery-status reduction
//!
//! Provider callbacks arrive in any order. Status only moves forward by rank
//! (`sent < delivered < read`); `failed` always wins and is terminal. Each
//! callback back-fills its own timestamp column if it is still empty, so a
//! late `delivered` after `read` records `delivered_at` without regressing.

use chrono::{DateTime, Utc};

use crate::channels::{WhatsAppStatus, parse_unix_timestamp};
use crate::db::{DeliveryUpdate, Direction, MessageRecord, MessageRepo, MessageStatus};
use crate::{Error, Result};

/// Compare-and-set attempts before giving up on a contended row
const MAX_CAS_ATTEMPTS: usize = 4;

/// Status reported by a provider callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    const fn as_message_status(self) -> MessageStatus {
        match self {
            Self::Sent => MessageStatus::Sent,
            Self::Delivered => MessageStatus::Delivered,
            Self::Read => MessageStatus::Read,
            Self::Failed => MessageStatus::Failed,
        }
    }
}

/// A normalized status callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCallback {
    pub provider_message_id: String,
    pub status: DeliveryStatus,
    pub timestamp: Option<DateTime<Utc>>,
    pub error_code: Option<i64>,
    pub error_title: Option<String>,
}

impl StatusCallback {
    /// Normalize a provider callback; `None` for statuses we do not track
    #[must_use]
    pub fn from_provider(status: &WhatsAppStatus) -> Option<Self> {
        let delivery = DeliveryStatus::parse(&status.status)?;
        let first_error = status.errors.first();

        Some(Self {
            provider_message_id: status.id.clone(),
            status: delivery,
            timestamp: status.timestamp.as_deref().and_then(parse_unix_timestamp),
            error_code: first_error.and_then(|e| e.code),
            error_title: first_error.and_then(|e| e.title.clone().or_else(|| e.message.clone())),
        })
    }
}

/// Result of applying one callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The record was updated; carries the resulting status
    Applied(MessageStatus),
    /// The callback carried nothing new for the record
    Unchanged,
    /// No outgoing record has this provider id
    Unmatched,
}

const fn rank(status: MessageStatus) -> u8 {
    match status {
        MessageStatus::Received => 0,
        MessageStatus::Sent => 1,
        MessageStatus::Delivered => 2,
        MessageStatus::Read => 3,
        MessageStatus::Failed => 4,
    }
}

/// Merge a callback into a record's delivery state
///
/// Returns `None` when the merge changes nothing. `now` stands in for a
/// missing callback timestamp.
#[must_use]
pub fn reduce(
    record: &MessageRecord,
    callback: &StatusCallback,
    now: DateTime<Utc>,
) -> Option<DeliveryUpdate> {
    if record.status == MessageStatus::Failed {
        return None;
    }

    let incoming = callback.status.as_message_status();
    let at = callback.timestamp.unwrap_or(now);

    let mut update = DeliveryUpdate {
        status: if rank(incoming) > rank(record.status) {
            incoming
        } else {
            record.status
        },
        sent_at: record.sent_at,
        delivered_at: record.delivered_at,
        read_at: record.read_at,
        error_code: record.error_code,
        error_message: record.error_message.clone(),
    };

    match callback.status {
        DeliveryStatus::Sent => {
            update.sent_at.get_or_insert(at);
        }
        DeliveryStatus::Delivered => {
            update.delivered_at.get_or_insert(at);
        }
        DeliveryStatus::Read => {
            update.read_at.get_or_insert(at);
        }
        DeliveryStatus::Failed => {
            update.error_code = callback.error_code;
            update.error_message = callback.error_title.clone();
        }
    }

    let unchanged = update.status == record.status
        && update.sent_at == record.sent_at
        && update.delivered_at == record.delivered_at
        && update.read_at == record.read_at
        && update.error_code == record.error_code
        && update.error_message == record.error_message;

    (!unchanged).then_some(update)
}

/// Look up the record a callback refers to and merge the callback into it
///
/// # Errors
///
/// Returns error if the store fails or the row stays contended
pub fn apply(messages: &MessageRepo, callback: &StatusCallback) -> Result<StatusOutcome> {
    for _ in 0..MAX_CAS_ATTEMPTS {
        let Some(record) = messages.find_by_provider_id(&callback.provider_message_id)? else {
            return Ok(StatusOutcome::Unmatched);
        };
        if record.direction != Direction::Outgoing {
            return Ok(StatusOutcome::Unmatched);
        }

        let Some(update) = reduce(&record, callback, Utc::now()) else {
            return Ok(StatusOutcome::Unchanged);
        };

        if messages.update_delivery(&record, &update)? {
            return Ok(StatusOutcome::Applied(update.status));
        }

        tracing::debug!(
            message_id = %callback.provider_message_id,
            "status row changed concurrently, retrying"
        );
    }

    Err(Error::Database(format!(
        "status update for {} kept losing to concurrent writers",
        callback.provider_message_id
    )))
}
