use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::mermaid::EngineKind;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "MERMAID_FIX_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ai: AiConfig,
    pub repair: RepairConfig,
    pub engine: EngineKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub provider: String,
    pub model: String,
    pub api_url: String,
    pub api_key: String,
    /// Models offered in the confirmation prompt.
    pub models: Vec<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            models: vec!["gpt-4o-mini".to_string(), "gpt-4o".to_string()],
        }
    }
}

impl AiConfig {
    /// Configured key, or the provider's conventional environment variable.
    pub fn resolved_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        let var = match self.provider.to_lowercase().as_str() {
            "claude" | "anthropic" => "ANTHROPIC_API_KEY",
            _ => "OPENAI_API_KEY",
        };
        std::env::var(var)
            .or_else(|_| std::env::var("MERMAID_FIX_API_KEY"))
            .unwrap_or_default()
    }

    /// Configured models plus the default model, without duplicates.
    pub fn model_choices(&self) -> Vec<String> {
        let mut choices = Vec::with_capacity(self.models.len() + 1);
        choices.push(self.model.clone());
        for model in &self.models {
            if !choices.contains(model) {
                choices.push(model.clone());
            }
        }
        choices
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub temperature: f32,
    pub timeout_secs: u64,
    pub custom_prompt: Option<String>,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            timeout_secs: 60,
            custom_prompt: None,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn get_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mermaid-fix")
            .join("config.yaml")
    }

    /// Load the config at `path` (or the default location). A missing file
    /// yields defaults; a broken one is reported and also yields defaults.
    pub fn load_or_default_from(path: Option<&Path>) -> Self {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::get_config_path);

        if !path.exists() {
            log::debug!("no config at {}, using defaults", path.display());
            return Self::default();
        }

        match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{:#}; falling back to defaults", e);
                Self::default()
            }
        }
    }

    pub fn load_or_default() -> Self {
        Self::load_or_default_from(None)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_file(Self::get_config_path())
    }

    /// YAML rendering with the API key masked, for display.
    pub fn to_display_yaml(&self) -> Result<String> {
        let mut shown = self.clone();
        shown.ai.api_key = mask_key(&self.ai.api_key);
        Ok(serde_yaml::to_string(&shown)?)
    }
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.is_empty() {
        String::new()
    } else if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}", "*".repeat(chars.len() - 4), tail)
    }
}
