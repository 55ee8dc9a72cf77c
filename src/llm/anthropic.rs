//! Anthropic Messages API client
//!
//! Serves plain chat completions and the document extractor's text and
//! vision requests.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{CompletionService, Turn};
use crate::attachments::{ExtractionInput, ExtractionService};
use crate::{Error, Result};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default model
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Token budget for extraction responses
const EXTRACTION_MAX_TOKENS: u32 = 1500;

/// Anthropic client
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

/// Anthropic message request
#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

/// A message in the request
#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<ContentBlock<'a>>,
}

/// Content block (text or image)
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentBlock<'a> {
    #[serde(rename = "text")]
    Text { text: &'a str },
    #[serde(rename = "image")]
    Image { source: ImageSource<'a> },
}

/// Image source
#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    source_type: &'a str,
    media_type: &'a str,
    data: String,
}

/// Anthropic message response
#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ResponseContent>,
}

/// Response content block
#[derive(Debug, Deserialize)]
struct ResponseContent {
    text: Option<String>,
}

impl AnthropicClient {
    /// Create a new client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new(api_key: SecretString, timeout: Duration) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Anthropic API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: ANTHROPIC_API_URL.to_string(),
        })
    }

    /// Create with a specific model
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    /// Override the endpoint URL
    #[must_use]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    /// Send a request and join the text blocks of the response
    async fn send(&self, request: &MessageRequest<'_>) -> Result<String> {
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Completion(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Completion(format!("API error {status}: {body}")));
        }

        let result: MessageResponse = response
            .json()
            .await
            .map_err(|e| Error::Completion(format!("parse error: {e}")))?;

        let text = result
            .content
            .into_iter()
            .filter_map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(Error::Completion("empty completion".to_string()));
        }

        Ok(text)
    }
}

#[async_trait]
impl CompletionService for AnthropicClient {
    async fn complete(&self, system: &str, turns: &[Turn], max_tokens: u32) -> Result<String> {
        let messages = turns
            .iter()
            .map(|turn| Message {
                role: turn.role.as_str(),
                content: vec![ContentBlock::Text {
                    text: &turn.content,
                }],
            })
            .collect();

        let request = MessageRequest {
            model: &self.model,
            max_tokens,
            system: Some(system),
            messages,
        };

        self.send(&request).await
    }
}

#[async_trait]
impl ExtractionService for AnthropicClient {
    async fn extract(&self, instructions: &str, input: ExtractionInput<'_>) -> Result<String> {
        let prompt;
        let content = match input {
            ExtractionInput::Text(text) => {
                prompt = format!("{instructions}\n\nTexto del documento:\n\"\"\"\n{text}\n\"\"\"");
                vec![ContentBlock::Text { text: &prompt }]
            }
            ExtractionInput::Image { data, mime_type } => vec![
                ContentBlock::Image {
                    source: ImageSource {
                        source_type: "base64",
                        media_type: normalize_mime_type(mime_type),
                        data: base64::engine::general_purpose::STANDARD.encode(data),
                    },
                },
                ContentBlock::Text { text: instructions },
            ],
        };

        let request = MessageRequest {
            model: &self.model,
            max_tokens: EXTRACTION_MAX_TOKENS,
            system: None,
            messages: vec![Message {
                role: "user",
                content,
            }],
        };

        let text = self.send(&request).await?;
        tracing::debug!(chars = text.len(), "extraction completion received");
        Ok(text)
    }
}

/// Normalize MIME type for Anthropic API
fn normalize_mime_type(mime_type: &str) -> &'static str {
    match mime_type.to_lowercase().as_str() {
        "image/png" => "image/png",
        "image/gif" => "image/gif",
        "image/webp" => "image/webp",
        // jpeg, jpg, and any unknown type default to jpeg
        _ => "image/jpeg",
    }
}
