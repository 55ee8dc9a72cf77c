//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use crm_inbox::attachments::{ExtractionInput, ExtractionService};
use crm_inbox::channels::{MediaInfo, MediaResolver, MessageSender, WhatsAppWebhook};
use crm_inbox::db::{self, Direction, MessageRecord, MessageRepo};
use crm_inbox::llm::{CompletionService, Turn};
use crm_inbox::pipeline::{Collaborators, InboundPipeline, PipelineSettings};
use crm_inbox::{DbPool, Error, Result};
use serde_json::{Value, json};

pub const PHONE: &str = "34612345678";

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Records outbound texts; fails for one recipient if asked to
#[derive(Default)]
pub struct MockSender {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail_for: Option<String>,
    counter: AtomicUsize,
}

impl MockSender {
    pub fn failing_for(phone: &str) -> Self {
        Self {
            fail_for: Some(phone.to_string()),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for MockSender {
    async fn send_text(&self, to: &str, text: &str) -> Result<String> {
        if self.fail_for.as_deref() == Some(to) {
            return Err(Error::Channel("(#131030) Recipient not in allowed list".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), text.to_string()));
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("wamid.OUT-{n}"))
    }
}

/// Serves one media payload, or fails at the chosen step
pub struct MockMedia {
    pub mime_type: String,
    pub data: Vec<u8>,
    pub fail_resolve: bool,
    pub fail_download: bool,
    pub resolved: Mutex<Vec<String>>,
}

impl MockMedia {
    pub fn serving(mime_type: &str, data: &[u8]) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: data.to_vec(),
            fail_resolve: false,
            fail_download: false,
            resolved: Mutex::new(Vec::new()),
        }
    }

    pub fn download_failing(mime_type: &str) -> Self {
        Self {
            fail_download: true,
            ..Self::serving(mime_type, &[])
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fail_resolve: true,
            ..Self::serving("application/octet-stream", &[])
        }
    }
}

#[async_trait]
impl MediaResolver for MockMedia {
    async fn resolve(&self, media_id: &str) -> Result<MediaInfo> {
        self.resolved.lock().unwrap().push(media_id.to_string());
        if self.fail_resolve {
            return Err(Error::Media("metadata lookup failed: 404 Not Found".to_string()));
        }
        Ok(MediaInfo {
            url: format!("https://lookaside.test/{media_id}"),
            mime_type: self.mime_type.clone(),
        })
    }

    async fn download(&self, _url: &str) -> Result<Vec<u8>> {
        if self.fail_download {
            return Err(Error::Media("download failed: 401 Unauthorized".to_string()));
        }
        Ok(self.data.clone())
    }
}

/// Scripted completion backend that records every conversation
pub struct MockCompletion {
    pub reply: Option<String>,
    pub calls: Mutex<Vec<Vec<Turn>>>,
}

impl MockCompletion {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn complete(&self, _system: &str, turns: &[Turn], _max_tokens: u32) -> Result<String> {
        self.calls.lock().unwrap().push(turns.to_vec());
        self.reply
            .clone()
            .ok_or_else(|| Error::Completion("request failed: timed out".to_string()))
    }
}

/// Scripted extraction backend
pub struct MockExtraction {
    pub response: Option<String>,
    pub calls: AtomicUsize,
}

impl MockExtraction {
    pub fn responding(text: &str) -> Self {
        Self {
            response: Some(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionService for MockExtraction {
    async fn extract(&self, _instructions: &str, _input: ExtractionInput<'_>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response
            .clone()
            .ok_or_else(|| Error::Completion("API error 529: overloaded".to_string()))
    }
}

/// Pipeline wired to mocks, with handles to inspect them
pub struct Harness {
    pub pool: DbPool,
    pub pipeline: InboundPipeline,
    pub sender: Arc<MockSender>,
    pub media: Arc<MockMedia>,
    pub completion: Arc<MockCompletion>,
    pub extraction: Arc<MockExtraction>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(
            MockSender::default(),
            MockMedia::serving("image/jpeg", &[0xff, 0xd8, 0xff]),
            MockCompletion::replying("¡Hola! Soy el asistente. ¿Nos envías tu última factura?"),
            MockExtraction::responding(BILL_JSON),
            PipelineSettings::default(),
        )
    }

    pub fn with(
        sender: MockSender,
        media: MockMedia,
        completion: MockCompletion,
        extraction: MockExtraction,
        settings: PipelineSettings,
    ) -> Self {
        let pool = setup_test_db();
        let sender = Arc::new(sender);
        let media = Arc::new(media);
        let completion = Arc::new(completion);
        let extraction = Arc::new(extraction);

        let pipeline = InboundPipeline::new(
            pool.clone(),
            Collaborators {
                sender: sender.clone(),
                media: media.clone(),
                completion: completion.clone(),
                extraction: extraction.clone(),
            },
            settings,
        );

        Self {
            pool,
            pipeline,
            sender,
            media,
            completion,
            extraction,
        }
    }

    /// Every stored message for a phone, oldest first
    pub fn messages(&self, phone: &str) -> Vec<MessageRecord> {
        MessageRepo::new(self.pool.clone())
            .history_for_phone(phone, 1000, None)
            .unwrap()
    }

    pub fn outgoing(&self, phone: &str) -> Vec<MessageRecord> {
        self.messages(phone)
            .into_iter()
            .filter(|m| m.direction == Direction::Outgoing)
            .collect()
    }

    pub fn incoming(&self, phone: &str) -> Vec<MessageRecord> {
        self.messages(phone)
            .into_iter()
            .filter(|m| m.direction == Direction::Incoming)
            .collect()
    }
}

pub const BILL_JSON: &str = r#"{
  "tipo": "luz",
  "compania": "Iberdrola",
  "importe_total": "84,20",
  "periodo": "01/03/2025 - 31/03/2025",
  "consumo": "312 kWh",
  "potencia_contratada": null,
  "tarifa": "2.0TD",
  "titular": "Lucía Martín",
  "direccion": "Calle Mayor 1, Madrid",
  "cups": "ES0021000000000000AA",
  "resumen": "Factura de luz de marzo",
  "observaciones_ahorro": ["Potencia contratada por encima del consumo real"]
}"#;

/// Wrap messages, statuses and contacts in a Cloud API envelope
pub fn envelope(messages: Vec<Value>, statuses: Vec<Value>) -> Value {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "WABA_ID",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": {"display_phone_number": "34910000000", "phone_number_id": "PHONE_ID"},
                    "contacts": [{"wa_id": PHONE, "profile": {"name": "Lucía"}}],
                    "messages": messages,
                    "statuses": statuses
                }
            }]
        }]
    })
}

pub fn text_message(id: &str, from: &str, body: &str) -> Value {
    json!({
        "from": from,
        "id": id,
        "timestamp": "1710000000",
        "type": "text",
        "text": {"body": body}
    })
}

pub fn image_message(id: &str, media_id: &str) -> Value {
    json!({
        "from": PHONE,
        "id": id,
        "timestamp": "1710000000",
        "type": "image",
        "image": {"id": media_id, "mime_type": "image/jpeg", "sha256": "abc"}
    })
}

pub fn document_message(id: &str, media_id: &str, mime_type: &str) -> Value {
    json!({
        "from": PHONE,
        "id": id,
        "timestamp": "1710000000",
        "type": "document",
        "document": {"id": media_id, "mime_type": mime_type, "filename": "factura.pdf"}
    })
}

pub fn reaction_message(id: &str, emoji: &str) -> Value {
    json!({
        "from": PHONE,
        "id": id,
        "timestamp": "1710000000",
        "type": "reaction",
        "reaction": {"message_id": "wamid.PREV", "emoji": emoji}
    })
}

/// Reject inserts into `table` for one phone, as a failing store would
pub fn fail_inserts_for(pool: &crm_inbox::DbPool, table: &str, phone: &str) {
    pool.get()
        .unwrap()
        .execute_batch(&format!(
            "CREATE TRIGGER reject_{table} BEFORE INSERT ON {table}
             WHEN NEW.phone = '{phone}'
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;"
        ))
        .unwrap();
}

pub fn status(id: &str, status: &str, timestamp: &str) -> Value {
    json!({
        "id": id,
        "status": status,
        "timestamp": timestamp,
        "recipient_id": PHONE
    })
}

pub fn parse(value: Value) -> WhatsAppWebhook {
    serde_json::from_value(value).expect("valid envelope")
}
