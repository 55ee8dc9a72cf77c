//! Completion service abstraction
//!
//! The conversational responder and the document extractor both go through a
//! chat-completion backend; [`AnthropicClient`] is the production one.

mod anthropic;

use async_trait::async_trait;

pub use anthropic::{AnthropicClient, DEFAULT_MODEL};

use crate::attachments::{ExtractionInput, ExtractionService};
use crate::{Error, Result};

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of conversation history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Non-streaming chat completion
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Complete a conversation, returning the assistant text
    async fn complete(&self, system: &str, turns: &[Turn], max_tokens: u32) -> Result<String>;
}

/// Stand-in backend when no API key is configured
///
/// Every call fails, so the responder falls back to its canned reply and
/// documents are acknowledged without analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

#[async_trait]
impl CompletionService for Unconfigured {
    async fn complete(&self, _system: &str, _turns: &[Turn], _max_tokens: u32) -> Result<String> {
        Err(Error::Completion("no completion backend configured".to_string()))
    }
}

#[async_trait]
impl ExtractionService for Unconfigured {
    async fn extract(&self, _instructions: &str, _input: ExtractionInput<'_>) -> Result<String> {
        Err(Error::Completion("no extraction backend configured".to_string()))
    }
}
