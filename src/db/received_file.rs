//! Received-file repository (downloaded media and its extraction state)

use base64::Engine;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use uuid::Uuid;

use super::{DbPool, format_datetime, parse_datetime};
use crate::{Error, Result};

/// Media class of a stored attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaClass {
    Image,
    Document,
}

impl MediaClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
        }
    }

    fn from_str(s: &str) -> Self {
        if s == "image" { Self::Image } else { Self::Document }
    }
}

/// Extraction state of a stored attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Analyzed,
}

impl AnalysisStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzed => "analyzed",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "analyzed" => Some(Self::Analyzed),
            _ => None,
        }
    }
}

/// A stored attachment (bytes are fetched separately with [`ReceivedFileRepo::data`])
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedFile {
    pub id: String,
    pub event_id: Option<String>,
    pub customer_id: Option<String>,
    pub phone: String,
    pub sender_name: Option<String>,
    pub media_id: String,
    pub media_class: MediaClass,
    pub mime_type: String,
    pub status: AnalysisStatus,
    pub extraction: Option<serde_json::Value>,
    pub doc_kind: Option<String>,
    pub company: Option<String>,
    pub amount: Option<f64>,
    pub meter_id: Option<String>,
    pub reviewed: bool,
    pub reviewed_by: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a newly downloaded attachment
#[derive(Debug, Clone)]
pub struct NewReceivedFile<'a> {
    pub event_id: &'a str,
    pub customer_id: Option<&'a str>,
    pub phone: &'a str,
    pub sender_name: Option<&'a str>,
    pub media_id: &'a str,
    pub media_class: MediaClass,
    pub mime_type: &'a str,
    pub data: &'a [u8],
}

/// Completed extraction, with the columns denormalized for filtering
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub payload: serde_json::Value,
    pub doc_kind: Option<String>,
    pub company: Option<String>,
    pub amount: Option<f64>,
    pub meter_id: Option<String>,
}

/// Listing filter for the review queue
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub status: Option<AnalysisStatus>,
    pub reviewed: Option<bool>,
    pub phone: Option<String>,
    pub limit: Option<usize>,
}

const COLUMNS: &str = "id, event_id, customer_id, phone, sender_name, media_id, media_class, \
     mime_type, status, extraction, doc_kind, company, amount, meter_id, reviewed, reviewed_by, \
     notes, created_at, updated_at";

fn row_to_file(row: &Row<'_>) -> rusqlite::Result<ReceivedFile> {
    let extraction: Option<String> = row.get(9)?;
    Ok(ReceivedFile {
        id: row.get(0)?,
        event_id: row.get(1)?,
        customer_id: row.get(2)?,
        phone: row.get(3)?,
        sender_name: row.get(4)?,
        media_id: row.get(5)?,
        media_class: MediaClass::from_str(&row.get::<_, String>(6)?),
        mime_type: row.get(7)?,
        status: AnalysisStatus::from_str(&row.get::<_, String>(8)?)
            .unwrap_or(AnalysisStatus::Pending),
        extraction: extraction.and_then(|s| serde_json::from_str(&s).ok()),
        doc_kind: row.get(10)?,
        company: row.get(11)?,
        amount: row.get(12)?,
        meter_id: row.get(13)?,
        reviewed: row.get::<_, i32>(14)? != 0,
        reviewed_by: row.get(15)?,
        notes: row.get(16)?,
        created_at: parse_datetime(&row.get::<_, String>(17)?),
        updated_at: parse_datetime(&row.get::<_, String>(18)?),
    })
}

/// Repository for received files
#[derive(Debug, Clone)]
pub struct ReceivedFileRepo {
    pool: DbPool,
}

impl ReceivedFileRepo {
    /// Create a new repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Store a downloaded attachment as `pending`
    ///
    /// Returns `None` if the event already has a stored file.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self, file: &NewReceivedFile<'_>) -> Result<Option<ReceivedFile>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let encoded = base64::engine::general_purpose::STANDARD.encode(file.data);

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO received_files
                (id, event_id, customer_id, phone, sender_name, media_id, media_class, mime_type,
                 data_base64, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10, ?10)",
            params![
                id,
                file.event_id,
                file.customer_id,
                file.phone,
                file.sender_name,
                file.media_id,
                file.media_class.as_str(),
                file.mime_type,
                encoded,
                format_datetime(now),
            ],
        )?;

        if inserted == 0 {
            return Ok(None);
        }

        Ok(Some(ReceivedFile {
            id,
            event_id: Some(file.event_id.to_string()),
            customer_id: file.customer_id.map(String::from),
            phone: file.phone.to_string(),
            sender_name: file.sender_name.map(String::from),
            media_id: file.media_id.to_string(),
            media_class: file.media_class,
            mime_type: file.mime_type.to_string(),
            status: AnalysisStatus::Pending,
            extraction: None,
            doc_kind: None,
            company: None,
            amount: None,
            meter_id: None,
            reviewed: false,
            reviewed_by: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }))
    }

    /// Record a completed extraction
    ///
    /// Only a `pending` row is updated; returns `false` if the row was
    /// already analyzed or does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn mark_analyzed(&self, id: &str, analysis: &Analysis) -> Result<bool> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let changed = conn.execute(
            "UPDATE received_files
             SET status = 'analyzed', extraction = ?1, doc_kind = ?2, company = ?3,
                 amount = ?4, meter_id = ?5, updated_at = ?6
             WHERE id = ?7 AND status = 'pending'",
            params![
                serde_json::to_string(&analysis.payload)?,
                analysis.doc_kind,
                analysis.company,
                analysis.amount,
                analysis.meter_id,
                format_datetime(Utc::now()),
                id,
            ],
        )?;

        Ok(changed == 1)
    }

    /// Record a human review
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn mark_reviewed(&self, id: &str, reviewer: &str, notes: Option<&str>) -> Result<bool> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let changed = conn.execute(
            "UPDATE received_files
             SET reviewed = 1, reviewed_by = ?1, notes = COALESCE(?2, notes), updated_at = ?3
             WHERE id = ?4",
            params![reviewer, notes, format_datetime(Utc::now()), id],
        )?;

        Ok(changed == 1)
    }

    /// Get a file by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, id: &str) -> Result<Option<ReceivedFile>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let file = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM received_files WHERE id = ?1"),
                [id],
                row_to_file,
            )
            .optional()?;

        Ok(file)
    }

    /// Decoded bytes of a stored file
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails or stored data is corrupt
    pub fn data(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let encoded: Option<String> = conn
            .query_row(
                "SELECT data_base64 FROM received_files WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;

        encoded
            .map(|s| {
                base64::engine::general_purpose::STANDARD
                    .decode(s)
                    .map_err(|e| Error::Database(format!("corrupt file data: {e}")))
            })
            .transpose()
    }

    /// List files, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self, filter: &FileFilter) -> Result<Vec<ReceivedFile>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM received_files
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR reviewed = ?2)
               AND (?3 IS NULL OR phone = ?3)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?4"
        ))?;

        let limit = filter
            .limit
            .and_then(|l| i64::try_from(l).ok())
            .unwrap_or(100);

        let files = stmt
            .query_map(
                params![
                    filter.status.map(AnalysisStatus::as_str),
                    filter.reviewed.map(i32::from),
                    filter.phone,
                    limit,
                ],
                row_to_file,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn new_file(event_id: &str) -> NewReceivedFile<'_> {
        NewReceivedFile {
            event_id,
            customer_id: None,
            phone: "34612345678",
            sender_name: Some("Lucía"),
            media_id: "media-1",
            media_class: MediaClass::Document,
            mime_type: "application/pdf",
            data: b"%PDF-1.4 fake",
        }
    }

    #[test]
    fn create_stores_pending_with_data() {
        let repo = ReceivedFileRepo::new(init_memory().unwrap());
        let file = repo.create(&new_file("wamid.1")).unwrap().unwrap();
        assert_eq!(file.status, AnalysisStatus::Pending);

        let data = repo.data(&file.id).unwrap().unwrap();
        assert_eq!(data, b"%PDF-1.4 fake");
        assert_eq!(repo.get(&file.id).unwrap().unwrap().event_id.as_deref(), Some("wamid.1"));
    }

    #[test]
    fn one_file_per_event() {
        let repo = ReceivedFileRepo::new(init_memory().unwrap());
        assert!(repo.create(&new_file("wamid.1")).unwrap().is_some());
        assert!(repo.create(&new_file("wamid.1")).unwrap().is_none());
    }

    #[test]
    fn analyzed_only_once() {
        let repo = ReceivedFileRepo::new(init_memory().unwrap());
        let file = repo.create(&new_file("wamid.1")).unwrap().unwrap();

        let analysis = Analysis {
            payload: serde_json::json!({"tipo": "factura_luz"}),
            doc_kind: Some("factura_luz".to_string()),
            company: Some("Iberdrola".to_string()),
            amount: Some(87.45),
            meter_id: Some("ES0021000000000000AA".to_string()),
        };
        assert!(repo.mark_analyzed(&file.id, &analysis).unwrap());

        let second = Analysis {
            company: Some("Otra".to_string()),
            ..analysis
        };
        assert!(!repo.mark_analyzed(&file.id, &second).unwrap());

        let loaded = repo.get(&file.id).unwrap().unwrap();
        assert_eq!(loaded.status, AnalysisStatus::Analyzed);
        assert_eq!(loaded.company.as_deref(), Some("Iberdrola"));
        assert_eq!(loaded.amount, Some(87.45));
        assert_eq!(loaded.extraction.unwrap()["tipo"], "factura_luz");
    }

    #[test]
    fn review_and_filter() {
        let repo = ReceivedFileRepo::new(init_memory().unwrap());
        let a = repo.create(&new_file("wamid.a")).unwrap().unwrap();
        repo.create(&new_file("wamid.b")).unwrap().unwrap();

        assert!(repo.mark_reviewed(&a.id, "marta", Some("tarifa 2.0TD")).unwrap());
        assert!(!repo.mark_reviewed("missing", "marta", None).unwrap());

        let unreviewed = repo
            .list(&FileFilter {
                reviewed: Some(false),
                ..FileFilter::default()
            })
            .unwrap();
        assert_eq!(unreviewed.len(), 1);
        assert_eq!(unreviewed[0].event_id.as_deref(), Some("wamid.b"));

        let reviewed = repo.get(&a.id).unwrap().unwrap();
        assert!(reviewed.reviewed);
        assert_eq!(reviewed.reviewed_by.as_deref(), Some("marta"));
        assert_eq!(reviewed.notes.as_deref(), Some("tarifa 2.0TD"));

        let pending = repo
            .list(&FileFilter {
                status: Some(AnalysisStatus::Pending),
                ..FileFilter::default()
            })
            .unwrap();
        assert_eq!(pending.len(), 2);
    }
}
