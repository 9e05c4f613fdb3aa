use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_ENV: &str = "VISBOARD_CONFIG";
pub const ENDPOINT_ENV: &str = "VISBOARD_ENDPOINT";
pub const API_KEY_ENV: &str = "VISBOARD_API_KEY";
pub const MODEL_ENV: &str = "VISBOARD_MODEL";

/// Which surface of a board is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiMode {
    #[default]
    Canvas,
    Cards,
    Books,
}

/// User settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the OpenAI-compatible API
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub ui_mode: UiMode,
    /// Directory holding the board database
    pub data_dir: PathBuf,
    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: String::new(),
            ui_mode: UiMode::default(),
            data_dir: default_config_dir().join("data"),
            log_filter: "info".to_string(),
        }
    }
}

fn default_config_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("visboard")
}

impl Settings {
    /// `$VISBOARD_CONFIG`, else `~/.config/visboard/settings.yaml`.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| default_config_dir().join("settings.yaml"))
    }

    /// Load settings from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read settings file {}: {}", path.display(), e)
        })?;

        let settings: Settings = serde_yaml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse settings YAML {}: {}", path.display(), e)
        })?;

        Ok(settings)
    }

    /// Settings from the default path (defaults when the file is missing)
    /// with environment overrides applied.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let settings = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            debug!("No settings at {}, using defaults", path.display());
            Self::default()
        };
        Ok(settings.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Apply `VISBOARD_ENDPOINT`, `VISBOARD_API_KEY` and `VISBOARD_MODEL`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(endpoint) = set(ENDPOINT_ENV) {
            self.endpoint = endpoint;
        }
        if let Some(api_key) = set(API_KEY_ENV) {
            self.api_key = Some(api_key);
        }
        if let Some(model) = set(MODEL_ENV) {
            self.model = model;
        }
        self
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).map_err(|e| {
            anyhow::anyhow!("Failed to write settings file {}: {}", path.display(), e)
        })?;
        Ok(())
    }

    /// SQLite file holding every board room.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("boards.db")
    }
}
