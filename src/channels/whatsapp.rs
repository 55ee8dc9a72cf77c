//! `WhatsApp` Cloud API adapter
//!
//! Sends text replies and resolves media through the Graph API. Inbound
//! traffic arrives on the webhook; the payload types below mirror the Cloud
//! API envelope (`entry[].changes[].value`).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{MediaInfo, MediaResolver, MessageSender};
use crate::{Error, Result};

/// Default Graph API base URL
pub const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com/v21.0";

/// `WhatsApp` Cloud API client
#[derive(Debug, Clone)]
pub struct WhatsAppClient {
    /// Business API access token
    access_token: SecretString,
    /// Phone number ID messages are sent from
    phone_number_id: String,
    /// Graph API base URL (overridable for tests)
    graph_url: String,
    client: Client,
}

/// Response to a send request
#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessageId>,
}

#[derive(Debug, Deserialize)]
struct SentMessageId {
    id: String,
}

/// Media metadata lookup response
#[derive(Debug, Deserialize)]
struct MediaMetadata {
    url: String,
    mime_type: Option<String>,
}

impl WhatsAppClient {
    /// Create a new client
    ///
    /// # Arguments
    ///
    /// * `access_token` - `WhatsApp` Business API access token
    /// * `phone_number_id` - Phone number ID registered with `WhatsApp` Business
    /// * `graph_url` - Graph API base URL including version
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns error if credentials are empty or the HTTP client cannot be built
    pub fn new(
        access_token: SecretString,
        phone_number_id: String,
        graph_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        if access_token.expose_secret().is_empty() {
            return Err(Error::Config("WhatsApp access token required".to_string()));
        }
        if phone_number_id.is_empty() {
            return Err(Error::Config("WhatsApp phone number ID required".to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            access_token,
            phone_number_id,
            graph_url: graph_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

#[async_trait]
impl MessageSender for WhatsAppClient {
    async fn send_text(&self, to: &str, text: &str) -> Result<String> {
        let url = format!("{}/{}/messages", self.graph_url, self.phone_number_id);

        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {
                "body": text,
                "preview_url": false
            }
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.bearer())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("WhatsApp API error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "WhatsApp API error: {status} - {body}"
            )));
        }

        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("WhatsApp send response: {e}")))?;

        let id = sent
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| Error::Channel("WhatsApp send response had no message id".to_string()))?;

        tracing::debug!(to, message_id = %id, "WhatsApp message sent");
        Ok(id)
    }
}

#[async_trait]
impl MediaResolver for WhatsAppClient {
    async fn resolve(&self, media_id: &str) -> Result<MediaInfo> {
        let url = format!("{}/{media_id}", self.graph_url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(|e| Error::Media(format!("metadata request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Media(format!(
                "metadata lookup failed: {}",
                response.status()
            )));
        }

        let meta: MediaMetadata = response
            .json()
            .await
            .map_err(|e| Error::Media(format!("metadata parse failed: {e}")))?;

        Ok(MediaInfo {
            url: meta.url,
            mime_type: meta
                .mime_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(|e| Error::Media(format!("download failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Media(format!(
                "download failed: {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Media(format!("read failed: {e}")))?;

        Ok(bytes.to_vec())
    }
}

/// Parse a provider unix-seconds timestamp string
#[must_use]
pub fn parse_unix_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

/// `WhatsApp` webhook payload from Cloud API
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WhatsAppWebhook {
    /// Always `whatsapp_business_account` for this product
    #[serde(default)]
    pub object: Option<String>,
    /// Webhook entries
    #[serde(default)]
    pub entry: Vec<WhatsAppWebhookEntry>,
}

/// `WhatsApp` webhook entry
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WhatsAppWebhookEntry {
    #[serde(default)]
    pub id: Option<String>,
    /// Changes in this entry
    #[serde(default)]
    pub changes: Vec<WhatsAppWebhookChange>,
}

/// `WhatsApp` webhook change
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WhatsAppWebhookChange {
    #[serde(default)]
    pub field: Option<String>,
    /// The change value
    #[serde(default)]
    pub value: WhatsAppWebhookValue,
}

/// `WhatsApp` webhook value containing messages and status callbacks
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WhatsAppWebhookValue {
    /// Sender profiles for the messages in this value
    #[serde(default)]
    pub contacts: Vec<WhatsAppContact>,
    /// Incoming messages, each parsed on its own
    #[serde(default)]
    pub messages: Vec<WhatsAppMessageEntry>,
    /// Delivery status callbacks for previously sent messages
    #[serde(default)]
    pub statuses: Vec<WhatsAppStatus>,
}

impl WhatsAppWebhookValue {
    /// Display name the provider reports for a sender
    #[must_use]
    pub fn sender_name(&self, wa_id: &str) -> Option<&str> {
        self.contacts
            .iter()
            .find(|c| c.wa_id.as_deref() == Some(wa_id))
            .or_else(|| (self.contacts.len() == 1).then(|| &self.contacts[0]))
            .and_then(|c| c.profile.as_ref())
            .and_then(|p| p.name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}

/// Sender profile
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppContact {
    pub wa_id: Option<String>,
    pub profile: Option<WhatsAppProfile>,
}

/// Sender profile details
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppProfile {
    pub name: Option<String>,
}

/// One element of `value.messages`
///
/// A message whose shape cannot be read is kept as raw JSON so the rest of
/// the delivery still parses.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum WhatsAppMessageEntry {
    Message(WhatsAppMessage),
    Malformed(serde_json::Value),
}

impl WhatsAppMessageEntry {
    /// Provider id of the entry, when one can be read
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Message(message) => Some(&message.id),
            Self::Malformed(raw) => raw.get("id").and_then(serde_json::Value::as_str),
        }
    }
}

/// `WhatsApp` message
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppMessage {
    /// Sender phone number
    pub from: String,
    /// Message ID
    pub id: String,
    /// Message timestamp (unix seconds)
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Message type
    #[serde(rename = "type", default)]
    pub message_type: String,
    /// Text content (for text messages)
    pub text: Option<WhatsAppTextContent>,
    /// Image content
    pub image: Option<WhatsAppMedia>,
    /// Document content
    pub document: Option<WhatsAppDocument>,
    /// Audio content
    pub audio: Option<WhatsAppMedia>,
    /// Video content
    pub video: Option<WhatsAppMedia>,
    /// Sticker content
    pub sticker: Option<WhatsAppMedia>,
    /// Shared location
    pub location: Option<WhatsAppLocation>,
    /// Shared contact cards
    pub contacts: Option<Vec<WhatsAppSharedContact>>,
    /// Emoji reaction to an earlier message
    pub reaction: Option<WhatsAppReaction>,
    /// Quick-reply template button press
    pub button: Option<WhatsAppButton>,
    /// Interactive list / button reply
    pub interactive: Option<WhatsAppInteractive>,
}

/// `WhatsApp` media object (image, audio, video, sticker)
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppMedia {
    /// Media ID (use to fetch URL)
    #[serde(default)]
    pub id: Option<String>,
    /// MIME type
    pub mime_type: Option<String>,
    /// Caption
    pub caption: Option<String>,
}

/// `WhatsApp` document media
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppDocument {
    /// Media ID (use to fetch URL)
    #[serde(default)]
    pub id: Option<String>,
    /// MIME type
    pub mime_type: Option<String>,
    /// Filename
    pub filename: Option<String>,
    /// Caption
    pub caption: Option<String>,
}

/// Shared location
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppLocation {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    pub name: Option<String>,
    pub address: Option<String>,
}

/// Shared contact card
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppSharedContact {
    pub name: Option<WhatsAppContactName>,
}

/// Name block of a shared contact card
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppContactName {
    pub formatted_name: Option<String>,
}

/// Reaction to an earlier message
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppReaction {
    pub message_id: Option<String>,
    /// Absent when a reaction is removed
    pub emoji: Option<String>,
}

/// Template quick-reply button
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppButton {
    pub text: Option<String>,
    pub payload: Option<String>,
}

/// Interactive reply
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppInteractive {
    pub button_reply: Option<WhatsAppReply>,
    pub list_reply: Option<WhatsAppReply>,
}

/// Selected option of an interactive message
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppReply {
    pub id: Option<String>,
    pub title: Option<String>,
}

/// `WhatsApp` text message content
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppTextContent {
    /// Message body
    #[serde(default)]
    pub body: Option<String>,
}

/// Delivery status callback
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppStatus {
    /// Provider id of the message this status refers to
    pub id: String,
    /// `sent`, `delivered`, `read` or `failed`
    pub status: String,
    /// Unix seconds
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Present on `failed`
    #[serde(default)]
    pub errors: Vec<WhatsAppStatusError>,
}

/// Error attached to a failed status
#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppStatusError {
    pub code: Option<i64>,
    pub title: Option<String>,
    pub message: Option<String>,
}
