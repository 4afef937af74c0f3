//! CLI configuration file support
//!
//! Loads configuration from ~/.config/chatrelay/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use chatrelay_client::ChatSettings;

use crate::cli::Cli;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    pub server_url: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub assistant_id: Option<String>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    pub db_path: Option<String>,
}

impl CliConfig {
    /// Load configuration from default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from_path(&path),
            None => Self::default(),
        }
    }

    /// Missing or unreadable files yield the defaults.
    pub fn load_from_path(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), error = %err, "Ignoring invalid config file");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("chatrelay").join("config.toml"))
    }
}

/// Flags win over the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub server_url: String,
    pub settings: ChatSettings,
    pub assistant_id: Option<String>,
    pub db_path: Option<PathBuf>,
}

impl Resolved {
    pub fn new(cli: &Cli, config: CliConfig) -> Self {
        let defaults = ChatSettings::default();
        let settings = ChatSettings {
            provider: cli
                .provider
                .clone()
                .or(config.provider)
                .unwrap_or(defaults.provider),
            model: cli.model.clone().or(config.model),
            temperature: cli.temperature.or(config.temperature),
            system_prompt: cli.system.clone().or(config.system_prompt),
        };

        let db_path = if cli.no_save {
            None
        } else {
            cli.db_path
                .clone()
                .or(config.db_path)
                .map(PathBuf::from)
                .or_else(default_db_path)
        };

        Self {
            server_url: cli
                .server_url
                .clone()
                .or(config.server_url)
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            settings,
            assistant_id: cli.assistant.clone().or(config.assistant_id),
            db_path,
        }
    }
}

pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("chatrelay"))
}

fn default_db_path() -> Option<PathBuf> {
    data_dir().map(|p| p.join("chat.db"))
}
