//! Configuration management for the inbox service
//!
//! Values resolve env > TOML file > default. Secrets are wrapped in
//! [`SecretString`] as soon as they are read.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::channels::DEFAULT_GRAPH_URL;
use crate::llm::DEFAULT_MODEL;
use crate::pipeline::{DEFAULT_HISTORY_LIMIT, PipelineSettings};
use crate::{Error, Result, phone};

pub use file::{ConfigFile, config_file_path, load_config_file};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8080;

/// Inbox service configuration
#[derive(Debug)]
pub struct Config {
    /// HTTP server and storage
    pub server: ServerConfig,

    /// `WhatsApp` Cloud API credentials
    pub whatsapp: WhatsAppConfig,

    /// Completion and extraction backend
    pub llm: LlmConfig,

    /// Auto-response behaviour, injected into the pipeline
    pub pipeline: PipelineSettings,

    /// Timeouts for external calls
    pub timeouts: Timeouts,
}

/// HTTP server configuration
#[derive(Debug)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Bearer key for the file-review routes (from `CRM_INBOX_API_KEY`)
    pub api_key: Option<SecretString>,

    /// `SQLite` database file
    pub database_path: PathBuf,
}

/// `WhatsApp` Cloud API configuration
#[derive(Debug)]
pub struct WhatsAppConfig {
    pub access_token: SecretString,
    pub phone_number_id: String,
    /// Shared secret for the subscription challenge
    pub verify_token: SecretString,
    /// Graph API base URL including version
    pub graph_url: String,
}

/// Completion backend configuration
#[derive(Debug)]
pub struct LlmConfig {
    /// `Anthropic` API key; without it replies degrade to fixed templates
    pub api_key: Option<SecretString>,
    pub model: String,
}

/// Bounds for external calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Store connection checkout
    pub store: Duration,
    /// Graph API requests
    pub provider: Duration,
    /// Completion and vision requests
    pub llm: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            store: Duration::from_secs(5),
            provider: Duration::from_secs(15),
            llm: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from the environment and the TOML file
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file cannot be loaded
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let fc = load_config_file(config_path)?;
        Ok(Self::from_sources(fc, |key| std::env::var(key).ok()))
    }

    /// Resolve configuration from a parsed file and an env lookup
    #[must_use]
    pub fn from_sources(fc: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let secret = |value: Option<String>| value.map(SecretString::from);

        // Server config (env > toml > default)
        let server = ServerConfig {
            port: env("CRM_INBOX_PORT")
                .or_else(|| env("PORT"))
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            api_key: secret(env("CRM_INBOX_API_KEY").or(fc.server.api_key)),
            database_path: env("CRM_INBOX_DB_PATH")
                .map(PathBuf::from)
                .or(fc.server.database_path)
                .unwrap_or_else(default_database_path),
        };

        let whatsapp = WhatsAppConfig {
            access_token: SecretString::from(
                env("WHATSAPP_TOKEN")
                    .or(fc.whatsapp.access_token)
                    .unwrap_or_default(),
            ),
            phone_number_id: env("WHATSAPP_PHONE_ID")
                .or(fc.whatsapp.phone_number_id)
                .unwrap_or_default(),
            verify_token: SecretString::from(
                env("WHATSAPP_VERIFY_TOKEN")
                    .or(fc.whatsapp.verify_token)
                    .unwrap_or_default(),
            ),
            graph_url: env("WHATSAPP_GRAPH_URL")
                .or(fc.whatsapp.graph_url)
                .unwrap_or_else(|| DEFAULT_GRAPH_URL.to_string()),
        };

        let llm = LlmConfig {
            api_key: secret(env("ANTHROPIC_API_KEY").or(fc.llm.api_key)),
            model: env("CRM_INBOX_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        };

        let pipeline = PipelineSettings {
            auto_response: env("AUTO_RESPONSE_ENABLED")
                .and_then(|v| parse_flag(&v))
                .or(fc.pipeline.auto_response)
                .unwrap_or(true),
            country_code: env("CRM_INBOX_COUNTRY_CODE")
                .or(fc.pipeline.country_code)
                .unwrap_or_else(|| phone::DEFAULT_COUNTRY_CODE.to_string()),
            history_limit: fc.pipeline.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
        };

        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            store: fc.timeouts.store_secs.map_or(defaults.store, Duration::from_secs),
            provider: fc
                .timeouts
                .provider_secs
                .map_or(defaults.provider, Duration::from_secs),
            llm: fc.timeouts.llm_secs.map_or(defaults.llm, Duration::from_secs),
        };

        Self {
            server,
            whatsapp,
            llm,
            pipeline,
            timeouts,
        }
    }

    /// Fail fast on settings the service cannot run without
    ///
    /// # Errors
    ///
    /// Returns error naming every missing or invalid setting
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.whatsapp.access_token.expose_secret().is_empty() {
            problems.push("WHATSAPP_TOKEN is required");
        }
        if self.whatsapp.phone_number_id.is_empty() {
            problems.push("WHATSAPP_PHONE_ID is required");
        }
        if self.whatsapp.verify_token.expose_secret().is_empty() {
            problems.push("WHATSAPP_VERIFY_TOKEN is required");
        }
        if self.pipeline.country_code.is_empty()
            || !self.pipeline.country_code.bytes().all(|b| b.is_ascii_digit())
        {
            problems.push("CRM_INBOX_COUNTRY_CODE must be digits only");
        }
        if self.timeouts.store.is_zero() || self.timeouts.provider.is_zero() || self.timeouts.llm.is_zero()
        {
            problems.push("timeouts must be greater than zero");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }
}

/// Data directory (`~/.local/share/crm-inbox` on Linux)
#[must_use]
pub fn data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("crm-inbox"))
}

fn default_database_path() -> PathBuf {
    data_dir().join("crm-inbox.db")
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::file::{PipelineFileConfig, ServerFileConfig};

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("WHATSAPP_TOKEN", "token"),
        ("WHATSAPP_PHONE_ID", "1234567890"),
        ("WHATSAPP_VERIFY_TOKEN", "verify-me"),
    ];

    #[test]
    fn defaults() {
        let config = Config::from_sources(ConfigFile::default(), env_of(&REQUIRED));

        assert_eq!(config.server.port, DEFAULT_PORT);
        assert!(config.server.api_key.is_none());
        assert_eq!(config.whatsapp.graph_url, DEFAULT_GRAPH_URL);
        assert_eq!(config.llm.model, DEFAULT_MODEL);
        assert_eq!(config.pipeline, PipelineSettings::default());
        assert_eq!(config.timeouts, Timeouts::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_file() {
        let fc = ConfigFile {
            server: ServerFileConfig {
                port: Some(9000),
                ..ServerFileConfig::default()
            },
            pipeline: PipelineFileConfig {
                auto_response: Some(true),
                country_code: Some("351".to_string()),
                history_limit: Some(3),
            },
            ..ConfigFile::default()
        };

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "7000"));
        pairs.push(("AUTO_RESPONSE_ENABLED", "false"));
        let config = Config::from_sources(fc, env_of(&pairs));

        assert_eq!(config.server.port, 7000);
        assert!(!config.pipeline.auto_response);
        assert_eq!(config.pipeline.country_code, "351");
        assert_eq!(config.pipeline.history_limit, 3);
    }

    #[test]
    fn unparseable_flag_falls_through() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("AUTO_RESPONSE_ENABLED", "maybe"));
        let config = Config::from_sources(ConfigFile::default(), env_of(&pairs));
        assert!(config.pipeline.auto_response);
    }

    #[test]
    fn validate_lists_missing_credentials() {
        let config = Config::from_sources(ConfigFile::default(), env_of(&[("WHATSAPP_TOKEN", " ")]));
        let Err(Error::Config(msg)) = config.validate() else {
            panic!("expected config error");
        };
        assert!(msg.contains("WHATSAPP_TOKEN"));
        assert!(msg.contains("WHATSAPP_PHONE_ID"));
        assert!(msg.contains("WHATSAPP_VERIFY_TOKEN"));
    }
}
