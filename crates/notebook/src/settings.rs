//! Application settings for the notebook.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/asm-studio/settings.json
//! - Linux: ~/.config/asm-studio/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\asm-studio\settings.json
//!
//! Command-line flags override individual values at startup.

use crate::assistant::{AiProvider, AssistantConfig};
use anyhow::Result;
use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    /// Base URL of the simulator backend
    pub backend_url: String,

    /// Per-request timeout for backend calls
    pub timeout_ms: u64,

    /// Provider answering `@ask`
    pub ai_provider: AiProvider,

    #[serde(deserialize_with = "deserialize_api_key")]
    pub gemini_api_key: Option<String>,

    #[serde(deserialize_with = "deserialize_api_key")]
    pub groq_api_key: Option<String>,

    /// Model override for Gemini; empty uses the default
    pub gemini_model: String,

    /// Model override for Groq; empty uses the default
    pub groq_model: String,

    /// Quiet period before the notebook is autosaved
    pub autosave_delay_ms: u64,
}

/// Deserialize an API key, treating blank strings as absent.
fn deserialize_api_key<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty()))
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            backend_url: sim_client::DEFAULT_BASE_URL.to_string(),
            timeout_ms: sim_client::DEFAULT_TIMEOUT.as_millis() as u64,
            ai_provider: AiProvider::Gemini,
            gemini_api_key: None,
            groq_api_key: None,
            gemini_model: String::new(),
            groq_model: String::new(),
            autosave_delay_ms: 1000,
        }
    }
}

impl AppSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }

    /// Assistant configuration for the selected provider.
    pub fn assistant_config(&self) -> AssistantConfig {
        let (api_key, model) = match self.ai_provider {
            AiProvider::Gemini => (&self.gemini_api_key, &self.gemini_model),
            AiProvider::Groq => (&self.groq_api_key, &self.groq_model),
        };
        AssistantConfig {
            provider: self.ai_provider,
            api_key: api_key.clone(),
            model: (!model.is_empty()).then(|| model.clone()),
            base_url: None,
        }
    }
}

/// Get the path to the settings file
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("asm-studio")
        .join("settings.json")
}

/// Load settings from disk, returning defaults if the file doesn't exist
pub fn load_settings() -> AppSettings {
    load_settings_from(&settings_path())
}

pub fn load_settings_from(path: &Path) -> AppSettings {
    if !path.exists() {
        return AppSettings::default();
    }
    match std::fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
    {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Ignoring unreadable settings file {}: {}", path.display(), e);
            AppSettings::default()
        }
    }
}

/// Save settings to disk
pub fn save_settings(settings: &AppSettings) -> Result<()> {
    save_settings_to(&settings_path(), settings)
}

pub fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}
