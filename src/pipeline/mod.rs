//! Inbound event pipeline
//!
//! One webhook delivery is processed inline, event by event:
//!
//! ```text
//! message ─► record (incoming) ─► eligible? ─┬─ image/document ─► fetch ─► store file ─► extract ─► compose
//!                                            └─ everything else ─► responder (history + completion)
//!                                                          │
//!                                                          ▼
//!                                           send ─► record (outgoing, AI-generated)
//!
//! status ─► reduce ─► compare-and-set on the matching outgoing record
//! ```
//!
//! The incoming record is always written before any reply logic runs.
//! Failures after that point are contained to the event: they are logged and
//! the event simply gets no reply.

mod classify;
pub mod compose;
mod media;
mod responder;
mod status;

use std::sync::Arc;

use serde::Serialize;

pub use classify::{ContentKind, InboundContent, MediaRef, is_eligible};
pub use media::{MediaFetch, fetch_media};
pub use responder::{FALLBACK_REPLY, Responder, SYSTEM_PROMPT, build_turns};
pub use status::{DeliveryStatus, StatusCallback, StatusOutcome, apply as apply_status, reduce};

use crate::attachments::{DocumentExtractor, ExtractionError, ExtractionService};
use crate::channels::{
    MediaResolver, MessageSender, WhatsAppMessage, WhatsAppMessageEntry, WhatsAppStatus,
    WhatsAppWebhook, parse_unix_timestamp,
};
use crate::db::{
    Analysis, CustomerRepo, DbPool, Direction, MediaClass, MessageRecord, MessageRepo,
    MessageStatus, NewMessage, NewReceivedFile, ReceivedFileRepo,
};
use crate::llm::CompletionService;
use crate::{Result, phone};

/// Default number of prior messages given to the responder
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Behaviour switches fixed at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Global auto-response flag
    pub auto_response: bool,
    /// Country code prefixed to domestic mobile numbers
    pub country_code: String,
    /// Prior messages included as conversation context
    pub history_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            auto_response: true,
            country_code: phone::DEFAULT_COUNTRY_CODE.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// External collaborators the pipeline calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub sender: Arc<dyn MessageSender>,
    pub media: Arc<dyn MediaResolver>,
    pub completion: Arc<dyn CompletionService>,
    pub extraction: Arc<dyn ExtractionService>,
}

/// Terminal state of one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The event id was already recorded; nothing was done
    Duplicate,
    /// Recorded, no reply attempted (flag off, ineligible, or a contained failure)
    Recorded,
    /// Recorded and answered
    Replied,
    /// Recorded; the reply was composed but the provider rejected it
    ReplyFailed,
}

/// Per-delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WebhookReport {
    pub events_recorded: usize,
    pub duplicates: usize,
    pub replies_sent: usize,
    pub reply_failures: usize,
    pub statuses_applied: usize,
    pub statuses_dropped: usize,
    /// Unreadable messages, and events or statuses the store could not record
    pub errors: usize,
}

/// Inbound message and status processor
#[derive(Clone)]
pub struct InboundPipeline {
    messages: MessageRepo,
    files: ReceivedFileRepo,
    customers: CustomerRepo,
    sender: Arc<dyn MessageSender>,
    media: Arc<dyn MediaResolver>,
    extractor: DocumentExtractor,
    responder: Responder,
    settings: PipelineSettings,
}

impl InboundPipeline {
    #[must_use]
    pub fn new(pool: DbPool, collaborators: Collaborators, settings: PipelineSettings) -> Self {
        Self {
            messages: MessageRepo::new(pool.clone()),
            files: ReceivedFileRepo::new(pool.clone()),
            customers: CustomerRepo::new(pool),
            sender: collaborators.sender,
            media: collaborators.media,
            extractor: DocumentExtractor::new(collaborators.extraction),
            responder: Responder::new(collaborators.completion, settings.history_limit),
            settings,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Process every message and status callback in a delivery, in order
    pub async fn handle_webhook(&self, webhook: &WhatsAppWebhook) -> WebhookReport {
        let mut report = WebhookReport::default();

        for change in webhook.entry.iter().flat_map(|entry| &entry.changes) {
            let value = &change.value;

            for entry in &value.messages {
                let WhatsAppMessageEntry::Message(message) = entry else {
                    tracing::error!(event_id = ?entry.id(), "unreadable inbound message skipped");
                    report.errors += 1;
                    continue;
                };
                let sender_name = value.sender_name(&message.from);
                match self.handle_message(message, sender_name).await {
                    Ok(outcome) => report.record_message(outcome),
                    Err(e) => {
                        tracing::error!(event_id = %message.id, error = %e, "failed to record inbound message");
                        report.errors += 1;
                    }
                }
            }

            for status in &value.statuses {
                self.handle_status(status, &mut report);
            }
        }

        report
    }

    /// Record one inbound message and reply to it if eligible
    ///
    /// # Errors
    ///
    /// Returns error only if the inbound record itself cannot be written;
    /// reply failures are contained and reported through the outcome
    pub async fn handle_message(
        &self,
        message: &WhatsAppMessage,
        sender_name: Option<&str>,
    ) -> Result<MessageOutcome> {
        let phone = phone::normalize_with_country(&message.from, &self.settings.country_code);
        let content = InboundContent::from_message(message);
        let display = content.display();
        let customer_id = self.link_customer(&phone);

        let Some(record) = self.messages.insert(&NewMessage {
            customer_id: customer_id.as_deref(),
            phone: &phone,
            provider_message_id: Some(&message.id),
            event_id: None,
            kind: content.kind(),
            content: &display,
            direction: Direction::Incoming,
            status: MessageStatus::Received,
            sender_name,
            operator_id: None,
            sent_at: message.timestamp.as_deref().and_then(parse_unix_timestamp),
            error_message: None,
        })?
        else {
            tracing::info!(event_id = %message.id, "duplicate delivery ignored");
            return Ok(MessageOutcome::Duplicate);
        };

        tracing::info!(
            event_id = %message.id,
            phone = %record.phone,
            kind = content.kind().as_tag(),
            linked = record.customer_id.is_some(),
            "inbound message recorded"
        );

        Ok(self.reply(&record, &content, sender_name).await)
    }

    /// Route one status callback through the reducer
    fn handle_status(&self, status: &WhatsAppStatus, report: &mut WebhookReport) {
        let Some(callback) = StatusCallback::from_provider(status) else {
            tracing::debug!(message_id = %status.id, status = %status.status, "untracked status ignored");
            report.statuses_dropped += 1;
            return;
        };

        match status::apply(&self.messages, &callback) {
            Ok(StatusOutcome::Applied(new_status)) => {
                tracing::debug!(message_id = %status.id, status = new_status.as_str(), "delivery status applied");
                report.statuses_applied += 1;
            }
            Ok(StatusOutcome::Unchanged) => {
                report.statuses_applied += 1;
            }
            Ok(StatusOutcome::Unmatched) => {
                tracing::warn!(message_id = %status.id, status = %status.status, "status for unknown message dropped");
                report.statuses_dropped += 1;
            }
            Err(e) => {
                tracing::error!(message_id = %status.id, error = %e, "failed to apply delivery status");
                report.errors += 1;
            }
        }
    }

    /// Best-effort customer linkage by trailing digits
    fn link_customer(&self, phone: &str) -> Option<String> {
        match self.customers.find_by_phone_suffix(phone::match_suffix(phone)) {
            Ok(customer) => customer.map(|c| c.id),
            Err(e) => {
                tracing::warn!(phone, error = %e, "customer lookup failed");
                None
            }
        }
    }

    /// Reply stage; every failure here ends in `Recorded`
    async fn reply(
        &self,
        record: &MessageRecord,
        content: &InboundContent,
        sender_name: Option<&str>,
    ) -> MessageOutcome {
        let event_id = record.provider_message_id.as_deref().unwrap_or(&record.id);

        if !self.settings.auto_response {
            tracing::debug!(event_id, "auto-response disabled");
            return MessageOutcome::Recorded;
        }
        if !is_eligible(record.kind, &record.content) {
            tracing::debug!(event_id, kind = record.kind.as_tag(), "message not eligible for a reply");
            return MessageOutcome::Recorded;
        }
        if !phone::is_valid(&record.phone) {
            tracing::warn!(event_id, phone = %record.phone, "sender phone is not dialable, not replying");
            return MessageOutcome::Recorded;
        }

        let text = match self.compose_reply(record, content, sender_name).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(event_id, error = %e, "reply composition failed");
                return MessageOutcome::Recorded;
            }
        };

        match self.dispatch(record, event_id, &text).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(event_id, error = %e, "failed to record outgoing reply");
                MessageOutcome::Recorded
            }
        }
    }

    async fn compose_reply(
        &self,
        record: &MessageRecord,
        content: &InboundContent,
        sender_name: Option<&str>,
    ) -> Result<String> {
        if let (Some(class), Some(media)) = (record.kind.media_class(), content.media()) {
            return self.document_reply(record, class, media, sender_name).await;
        }

        let history =
            self.messages
                .history_for_phone(&record.phone, self.settings.history_limit, Some(&record.id))?;

        Ok(self
            .responder
            .respond(&record.content, &history, sender_name)
            .await)
    }

    /// Fetch, store and analyze an image or document, then compose its reply
    async fn document_reply(
        &self,
        record: &MessageRecord,
        class: MediaClass,
        media: &MediaRef,
        sender_name: Option<&str>,
    ) -> Result<String> {
        let event_id = record.provider_message_id.as_deref().unwrap_or(&record.id);

        let (data, mime_type) = match fetch_media(self.media.as_ref(), &media.id).await {
            MediaFetch::Fetched { data, mime_type } => (data, mime_type),
            MediaFetch::Unavailable { reason } => {
                tracing::warn!(event_id, media_id = %media.id, %reason, "media unavailable");
                return Ok(compose::media_unavailable(record.kind));
            }
        };

        // The webhook MIME is more specific when the lookup only says octet-stream
        let mime_type = match media.mime_type.as_deref() {
            Some(declared) if mime_type == "application/octet-stream" => declared.to_string(),
            _ => mime_type,
        };

        let Some(file) = self.files.create(&NewReceivedFile {
            event_id,
            customer_id: record.customer_id.as_deref(),
            phone: &record.phone,
            sender_name,
            media_id: &media.id,
            media_class: class,
            mime_type: &mime_type,
            data: &data,
        })?
        else {
            tracing::info!(event_id, "file already stored for this event");
            return Ok(compose::acknowledgment(sender_name));
        };

        tracing::info!(event_id, file_id = %file.id, mime = %mime_type, bytes = data.len(), "received file stored");

        let result = match self.extractor.extract(&data, &mime_type).await {
            Ok(result) => {
                match self.files.mark_analyzed(&file.id, &Analysis::from(&result)) {
                    Ok(true) => {
                        tracing::info!(event_id, file_id = %file.id, kind = result.kind(), "file analyzed");
                    }
                    Ok(false) => {
                        tracing::warn!(event_id, file_id = %file.id, "file was already analyzed");
                    }
                    Err(e) => {
                        tracing::warn!(event_id, file_id = %file.id, error = %e, "failed to store analysis");
                    }
                }
                Some(result)
            }
            Err(e @ (ExtractionError::Service(_) | ExtractionError::UnsupportedMime(_))) => {
                tracing::warn!(event_id, file_id = %file.id, error = %e, "extraction skipped");
                None
            }
            Err(e) => {
                tracing::error!(event_id, file_id = %file.id, error = %e, "extraction failed");
                None
            }
        };

        Ok(compose::document_reply(result.as_ref(), sender_name))
    }

    /// Send a reply and record it as an AI-generated outgoing message
    async fn dispatch(
        &self,
        record: &MessageRecord,
        event_id: &str,
        text: &str,
    ) -> Result<MessageOutcome> {
        let sent = self.sender.send_text(&record.phone, text).await;

        let (provider_id, status, error) = match &sent {
            Ok(id) => (Some(id.as_str()), MessageStatus::Sent, None),
            Err(e) => (None, MessageStatus::Failed, Some(e.to_string())),
        };

        let stored = self.messages.insert(&NewMessage {
            customer_id: record.customer_id.as_deref(),
            phone: &record.phone,
            provider_message_id: provider_id,
            event_id: Some(event_id),
            kind: ContentKind::Text,
            content: text,
            direction: Direction::Outgoing,
            status,
            sender_name: None,
            operator_id: None,
            sent_at: sent.is_ok().then(chrono::Utc::now),
            error_message: error.as_deref(),
        })?;

        if stored.is_none() {
            tracing::warn!(event_id, "reply already recorded for this event");
        }

        match sent {
            Ok(provider_id) => {
                tracing::info!(event_id, %provider_id, phone = %record.phone, "auto-reply sent");
                Ok(MessageOutcome::Replied)
            }
            Err(e) => {
                tracing::warn!(event_id, phone = %record.phone, error = %e, "auto-reply rejected by provider");
                Ok(MessageOutcome::ReplyFailed)
            }
        }
    }
}

impl WebhookReport {
    fn record_message(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::Duplicate => self.duplicates += 1,
            MessageOutcome::Recorded => self.events_recorded += 1,
            MessageOutcome::Replied => {
                self.events_recorded += 1;
                self.replies_sent += 1;
            }
            MessageOutcome::ReplyFailed => {
                self.events_recorded += 1;
                self.reply_failures += 1;
            }
        }
    }
}
