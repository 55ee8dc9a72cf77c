//! TOML configuration file loading
//!
//! Supports `~/.config/crm-inbox/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerFileConfig,

    #[serde(default)]
    pub whatsapp: WhatsAppFileConfig,

    #[serde(default)]
    pub llm: LlmFileConfig,

    #[serde(default)]
    pub pipeline: PipelineFileConfig,

    #[serde(default)]
    pub timeouts: TimeoutsFileConfig,
}

/// HTTP server and storage
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub port: Option<u16>,
    /// Bearer key for the file-review routes
    pub api_key: Option<String>,
    pub database_path: Option<PathBuf>,
}

/// `WhatsApp` Cloud API credentials
#[derive(Debug, Default, Deserialize)]
pub struct WhatsAppFileConfig {
    pub access_token: Option<String>,
    pub phone_number_id: Option<String>,
    /// Shared secret echoed back during webhook subscription
    pub verify_token: Option<String>,
    pub graph_url: Option<String>,
}

/// Completion and extraction backend
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    pub api_key: Option<String>,
    /// Model identifier (e.g. "claude-sonnet-4-20250514")
    pub model: Option<String>,
}

/// Auto-response behaviour
#[derive(Debug, Default, Deserialize)]
pub struct PipelineFileConfig {
    pub auto_response: Option<bool>,
    pub country_code: Option<String>,
    pub history_limit: Option<usize>,
}

/// Timeouts in seconds
#[derive(Debug, Default, Deserialize)]
pub struct TimeoutsFileConfig {
    pub store_secs: Option<u64>,
    pub provider_secs: Option<u64>,
    pub llm_secs: Option<u64>,
}

/// Load the TOML config file
///
/// An explicitly given path must exist and parse. The default path is
/// optional: a missing or unreadable file falls back to defaults.
///
/// # Errors
///
/// Returns error if an explicit path cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> Result<ConfigFile> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(ConfigFile::default());
    };

    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(ConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(ConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/crm-inbox/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("crm-inbox").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn explicit_file_is_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9000

[whatsapp]
phone_number_id = "1234567890"

[pipeline]
auto_response = false
history_limit = 4
"#
        )
        .unwrap();

        let config = load_config_file(Some(file.path())).unwrap();
        assert_eq!(config.server.port, Some(9000));
        assert_eq!(config.whatsapp.phone_number_id.as_deref(), Some("1234567890"));
        assert_eq!(config.pipeline.auto_response, Some(false));
        assert_eq!(config.pipeline.history_limit, Some(4));
        assert!(config.llm.model.is_none());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config_file(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn explicit_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = \"not a number\"").unwrap();
        assert!(matches!(
            load_config_file(Some(file.path())),
            Err(Error::Toml(_))
        ));
    }
}
