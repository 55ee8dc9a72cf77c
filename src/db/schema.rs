//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Customers (owned by the CRM; read here for linkage only)
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Messages in both directions
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            customer_id TEXT REFERENCES customers(id),
            phone TEXT NOT NULL,
            provider_message_id TEXT,
            kind TEXT NOT NULL,
            content TEXT NOT NULL,
            direction TEXT NOT NULL CHECK(direction IN ('incoming', 'outgoing')),
            status TEXT NOT NULL CHECK(status IN ('received', 'sent', 'delivered', 'read', 'failed')),
            sender_name TEXT,
            operator_id TEXT,
            sent_at TEXT,
            delivered_at TEXT,
            read_at TEXT,
            error_code INTEGER,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_phone ON messages(phone, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_provider ON messages(provider_message_id);
        CREATE INDEX IF NOT EXISTS idx_messages_customer ON messages(customer_id);

        -- Media attachments fetched from the provider
        CREATE TABLE IF NOT EXISTS received_files (
            id TEXT PRIMARY KEY,
            customer_id TEXT REFERENCES customers(id),
            phone TEXT NOT NULL,
            sender_name TEXT,
            media_id TEXT NOT NULL,
            media_class TEXT NOT NULL CHECK(media_class IN ('image', 'document')),
            mime_type TEXT NOT NULL,
            data_base64 TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'analyzed')),
            extraction TEXT,
            doc_kind TEXT,
            company TEXT,
            amount REAL,
            meter_id TEXT,
            reviewed INTEGER NOT NULL DEFAULT 0,
            reviewed_by TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_files_phone ON received_files(phone);
        CREATE INDEX IF NOT EXISTS idx_files_status ON received_files(status, reviewed);
        CREATE INDEX IF NOT EXISTS idx_files_kind ON received_files(doc_kind, company);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("migrated to schema v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Idempotency keys: one incoming row per provider event, one reply per event,
        -- one received file per event
        ALTER TABLE messages ADD COLUMN event_id TEXT;
        ALTER TABLE received_files ADD COLUMN event_id TEXT;

        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_incoming_event
            ON messages(provider_message_id) WHERE direction = 'incoming';
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_reply_event
            ON messages(event_id) WHERE direction = 'outgoing';
        CREATE UNIQUE INDEX IF NOT EXISTS idx_files_event ON received_files(event_id);

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::info!("migrated to schema v2");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_rerunnable() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();

        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn incoming_event_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();

        let insert = "INSERT INTO messages (id, phone, provider_message_id, kind, content, direction, status, created_at, updated_at)
                      VALUES (?1, '34600000000', 'wamid.1', 'text', 'hola', 'incoming', 'received', 'now', 'now')";
        conn.execute(insert, ["a"]).unwrap();
        assert!(conn.execute(insert, ["b"]).is_err());
    }
}
