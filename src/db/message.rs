//! Message repository for both directions of the `WhatsApp` conversation

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use uuid::Uuid;

use super::{DbPool, format_datetime, parse_datetime, parse_opt_datetime};
use crate::pipeline::ContentKind;
use crate::{Error, Result};

/// Message direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "incoming" => Some(Self::Incoming),
            "outgoing" => Some(Self::Outgoing),
            _ => None,
        }
    }
}

/// Message lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Received,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "received" => Some(Self::Received),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A persisted message
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub customer_id: Option<String>,
    pub phone: String,
    /// Provider id: the inbound event id, or the id returned by a send
    pub provider_message_id: Option<String>,
    /// Inbound event an outgoing reply answers
    pub event_id: Option<String>,
    pub kind: ContentKind,
    pub content: String,
    pub direction: Direction,
    pub status: MessageStatus,
    pub sender_name: Option<String>,
    /// Operator who wrote the message; `None` for automated replies
    pub operator_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for a new message row
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub customer_id: Option<&'a str>,
    pub phone: &'a str,
    pub provider_message_id: Option<&'a str>,
    pub event_id: Option<&'a str>,
    pub kind: ContentKind,
    pub content: &'a str,
    pub direction: Direction,
    pub status: MessageStatus,
    pub sender_name: Option<&'a str>,
    pub operator_id: Option<&'a str>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<&'a str>,
}

/// Full delivery state written by a status callback
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryUpdate {
    pub status: MessageStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
}

const COLUMNS: &str = "id, customer_id, phone, provider_message_id, event_id, kind, content, \
     direction, status, sender_name, operator_id, sent_at, delivered_at, read_at, \
     error_code, error_message, created_at";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        phone: row.get(2)?,
        provider_message_id: row.get(3)?,
        event_id: row.get(4)?,
        kind: ContentKind::from_tag(&row.get::<_, String>(5)?),
        content: row.get(6)?,
        direction: Direction::from_str(&row.get::<_, String>(7)?).unwrap_or(Direction::Incoming),
        status: MessageStatus::from_str(&row.get::<_, String>(8)?)
            .unwrap_or(MessageStatus::Received),
        sender_name: row.get(9)?,
        operator_id: row.get(10)?,
        sent_at: parse_opt_datetime(row.get(11)?),
        delivered_at: parse_opt_datetime(row.get(12)?),
        read_at: parse_opt_datetime(row.get(13)?),
        error_code: row.get(14)?,
        error_message: row.get(15)?,
        created_at: parse_datetime(&row.get::<_, String>(16)?),
    })
}

/// Message repository
#[derive(Debug, Clone)]
pub struct MessageRepo {
    pool: DbPool,
}

impl MessageRepo {
    /// Create a new message repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a message
    ///
    /// Returns `None` when an idempotency key already exists: an incoming row
    /// with the same provider id, or an outgoing reply for the same event.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn insert(&self, message: &NewMessage<'_>) -> Result<Option<MessageRecord>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = format_datetime(now);

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO messages
                (id, customer_id, phone, provider_message_id, event_id, kind, content, direction,
                 status, sender_name, operator_id, sent_at, error_message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
            params![
                id,
                message.customer_id,
                message.phone,
                message.provider_message_id,
                message.event_id,
                message.kind.as_tag(),
                message.content,
                message.direction.as_str(),
                message.status.as_str(),
                message.sender_name,
                message.operator_id,
                message.sent_at.map(format_datetime),
                message.error_message,
                now_str,
            ],
        )?;

        if inserted == 0 {
            return Ok(None);
        }

        Ok(Some(MessageRecord {
            id,
            customer_id: message.customer_id.map(String::from),
            phone: message.phone.to_string(),
            provider_message_id: message.provider_message_id.map(String::from),
            event_id: message.event_id.map(String::from),
            kind: message.kind,
            content: message.content.to_string(),
            direction: message.direction,
            status: message.status,
            sender_name: message.sender_name.map(String::from),
            operator_id: message.operator_id.map(String::from),
            sent_at: message.sent_at,
            delivered_at: None,
            read_at: None,
            error_code: None,
            error_message: message.error_message.map(String::from),
            created_at: now,
        }))
    }

    /// Find the outgoing message a provider status callback refers to
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_by_provider_id(&self, provider_message_id: &str) -> Result<Option<MessageRecord>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let record = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM messages
                     WHERE provider_message_id = ?1
                     ORDER BY direction = 'outgoing' DESC
                     LIMIT 1"
                ),
                [provider_message_id],
                row_to_record,
            )
            .optional()?;

        Ok(record)
    }

    /// Write a delivery update if the row still matches the `current` snapshot
    ///
    /// Status, timestamps and error fields are all compared, so two writers
    /// back-filling different columns cannot overwrite each other. Returns
    /// `false` when the row changed in between.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn update_delivery(&self, current: &MessageRecord, update: &DeliveryUpdate) -> Result<bool> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let changed = conn.execute(
            "UPDATE messages
             SET status = ?1, sent_at = ?2, delivered_at = ?3, read_at = ?4,
                 error_code = ?5, error_message = ?6, updated_at = ?7
             WHERE id = ?8 AND status = ?9
               AND sent_at IS ?10 AND delivered_at IS ?11 AND read_at IS ?12
               AND error_code IS ?13 AND error_message IS ?14",
            params![
                update.status.as_str(),
                update.sent_at.map(format_datetime),
                update.delivered_at.map(format_datetime),
                update.read_at.map(format_datetime),
                update.error_code,
                update.error_message,
                format_datetime(Utc::now()),
                current.id,
                current.status.as_str(),
                current.sent_at.map(format_datetime),
                current.delivered_at.map(format_datetime),
                current.read_at.map(format_datetime),
                current.error_code,
                current.error_message,
            ],
        )?;

        Ok(changed == 1)
    }

    /// Most recent messages for a phone, oldest first
    ///
    /// `exclude_id` leaves out the message currently being answered.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn history_for_phone(
        &self,
        phone: &str,
        limit: usize,
        exclude_id: Option<&str>,
    ) -> Result<Vec<MessageRecord>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM messages
             WHERE phone = ?1 AND (?2 IS NULL OR id != ?2)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3"
        ))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut records = stmt
            .query_map(params![phone, exclude_id, limit], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        records.reverse();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn incoming<'a>(event_id: &'a str, content: &'a str) -> NewMessage<'a> {
        NewMessage {
            customer_id: None,
            phone: "34612345678",
            provider_message_id: Some(event_id),
            event_id: None,
            kind: ContentKind::Text,
            content,
            direction: Direction::Incoming,
            status: MessageStatus::Received,
            sender_name: Some("Lucía"),
            operator_id: None,
            sent_at: None,
            error_message: None,
        }
    }

    fn reply<'a>(event_id: &'a str, provider_id: &'a str) -> NewMessage<'a> {
        NewMessage {
            customer_id: None,
            phone: "34612345678",
            provider_message_id: Some(provider_id),
            event_id: Some(event_id),
            kind: ContentKind::Text,
            content: "respuesta",
            direction: Direction::Outgoing,
            status: MessageStatus::Sent,
            sender_name: None,
            operator_id: None,
            sent_at: Some(Utc::now()),
            error_message: None,
        }
    }

    #[test]
    fn insert_and_find() {
        let repo = MessageRepo::new(init_memory().unwrap());
        let record = repo.insert(&incoming("wamid.1", "Hola")).unwrap().unwrap();

        let loaded = repo.find_by_provider_id("wamid.1").unwrap().unwrap();
        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.content, "Hola");
        assert_eq!(loaded.direction, Direction::Incoming);
        assert_eq!(loaded.status, MessageStatus::Received);
        assert_eq!(loaded.sender_name.as_deref(), Some("Lucía"));
    }

    #[test]
    fn duplicate_incoming_event_is_ignored() {
        let repo = MessageRepo::new(init_memory().unwrap());
        assert!(repo.insert(&incoming("wamid.1", "Hola")).unwrap().is_some());
        assert!(repo.insert(&incoming("wamid.1", "Hola")).unwrap().is_none());
        assert_eq!(repo.history_for_phone("34612345678", 10, None).unwrap().len(), 1);
    }

    #[test]
    fn second_reply_for_event_is_ignored() {
        let repo = MessageRepo::new(init_memory().unwrap());
        repo.insert(&incoming("wamid.in", "Hola")).unwrap();

        assert!(repo.insert(&reply("wamid.in", "wamid.out1")).unwrap().is_some());
        assert!(repo.insert(&reply("wamid.in", "wamid.out2")).unwrap().is_none());
        assert!(repo.find_by_provider_id("wamid.out2").unwrap().is_none());
    }

    #[test]
    fn find_by_provider_id_prefers_outgoing() {
        let repo = MessageRepo::new(init_memory().unwrap());
        repo.insert(&reply("wamid.in", "wamid.out")).unwrap();

        let found = repo.find_by_provider_id("wamid.out").unwrap().unwrap();
        assert_eq!(found.direction, Direction::Outgoing);
        assert!(repo.find_by_provider_id("wamid.missing").unwrap().is_none());
    }

    #[test]
    fn update_delivery_is_compare_and_set() {
        let repo = MessageRepo::new(init_memory().unwrap());
        let record = repo.insert(&reply("wamid.in", "wamid.out")).unwrap().unwrap();

        let update = DeliveryUpdate {
            status: MessageStatus::Delivered,
            sent_at: record.sent_at,
            delivered_at: Some(Utc::now()),
            read_at: None,
            error_code: None,
            error_message: None,
        };

        let stale = MessageRecord {
            status: MessageStatus::Read,
            ..record.clone()
        };
        assert!(!repo.update_delivery(&stale, &update).unwrap());
        assert!(repo.update_delivery(&record, &update).unwrap());

        let loaded = repo.find_by_provider_id("wamid.out").unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Delivered);
        assert!(loaded.delivered_at.is_some());
    }

    #[test]
    fn concurrent_backfill_is_not_overwritten() {
        let repo = MessageRepo::new(init_memory().unwrap());
        let record = repo.insert(&reply("wamid.in", "wamid.out")).unwrap().unwrap();
        let delivered = Utc::now();
        let read = delivered + chrono::Duration::seconds(5);

        // Both writers start from the same snapshot and leave status at `sent`
        let first = DeliveryUpdate {
            status: MessageStatus::Sent,
            sent_at: record.sent_at,
            delivered_at: Some(delivered),
            read_at: None,
            error_code: None,
            error_message: None,
        };
        let second = DeliveryUpdate {
            delivered_at: None,
            read_at: Some(read),
            ..first.clone()
        };

        assert!(repo.update_delivery(&record, &first).unwrap());
        assert!(!repo.update_delivery(&record, &second).unwrap());

        let loaded = repo.find_by_provider_id("wamid.out").unwrap().unwrap();
        assert!(loaded.delivered_at.is_some());
        assert!(loaded.read_at.is_none());
    }

    #[test]
    fn history_is_chronological_and_bounded() {
        let repo = MessageRepo::new(init_memory().unwrap());
        let mut last = None;
        for i in 0..5 {
            let id = format!("wamid.{i}");
            let content = format!("mensaje {i}");
            last = repo.insert(&incoming(&id, &content)).unwrap();
        }
        let last = last.unwrap();

        let history = repo
            .history_for_phone("34612345678", 3, Some(&last.id))
            .unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["mensaje 1", "mensaje 2", "mensaje 3"]);

        assert!(repo.history_for_phone("34999999999", 10, None).unwrap().is_empty());
    }
}
