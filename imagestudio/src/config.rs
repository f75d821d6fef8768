use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::utils::APP_NAME;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudioConfig {
    /// Base URL of the Gemini REST API (without the `/models/...` suffix)
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Key used when none has been picked through the key-selection flow
    #[serde(default)]
    pub api_key: Option<String>,

    /// Transport timeout for a single generation request (in seconds)
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,

    /// Where `save` writes images when no explicit path is given
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            request_timeout_secs: default_timeout(),
            output_dir: None,
        }
    }
}

impl StudioConfig {
    /// Loads `<config dir>/imagestudio/config.toml` when it exists, then
    /// applies environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = match path.as_deref() {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Overlays values from `lookup` (normally the process environment).
    /// Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|raw| !raw.trim().is_empty());

        if let Some(api_base) = non_empty("IMAGESTUDIO_API_BASE") {
            self.api_base = api_base.trim().trim_end_matches('/').to_string();
        }
        if let Some(api_key) = non_empty("GEMINI_API_KEY").or_else(|| non_empty("GOOGLE_API_KEY")) {
            self.api_key = Some(api_key.trim().to_string());
        }
        if let Some(timeout) = non_empty("IMAGESTUDIO_TIMEOUT_SECS").and_then(|raw| raw.trim().parse().ok()) {
            self.request_timeout_secs = timeout;
        }
        if let Some(dir) = non_empty("IMAGESTUDIO_OUTPUT_DIR") {
            self.output_dir = Some(PathBuf::from(dir));
        }
    }
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_timeout() -> u64 {
    120
}
