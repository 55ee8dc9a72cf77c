//! Messaging provider seams
//!
//! The pipeline talks to the provider only through these traits so tests can
//! substitute in-memory doubles.

pub mod whatsapp;

use async_trait::async_trait;

pub use whatsapp::{
    DEFAULT_GRAPH_URL, WhatsAppClient, WhatsAppContact, WhatsAppMessage, WhatsAppMessageEntry, WhatsAppStatus, WhatsAppStatusError,
    WhatsAppWebhook, WhatsAppWebhookChange, WhatsAppWebhookEntry, WhatsAppWebhookValue,
    parse_unix_timestamp,
};

use crate::Result;

/// Resolved download location for a provider media id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    /// Short-lived authenticated download URL
    pub url: String,
    /// MIME type reported by the provider
    pub mime_type: String,
}

/// Outbound text dispatch
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send a text message, returning the provider message id
    async fn send_text(&self, to: &str, text: &str) -> Result<String>;
}

/// Two-step media lookup: metadata, then bytes
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Look up the download URL and MIME type for a media id
    async fn resolve(&self, media_id: &str) -> Result<MediaInfo>;

    /// Download the bytes behind a resolved URL
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}
