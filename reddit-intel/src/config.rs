//! YAML configuration: focus areas, scraper pacing, model backend and paths.

use crate::llm_adapter::Provider;
use crate::types::{AnalysisMode, FetchConfig, FocusArea, IntelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub focus_areas: BTreeMap<String, FocusAreaConfig>,

    /// Focus area used when a command names none.
    #[serde(default)]
    pub default_focus: Option<String>,

    #[serde(default)]
    pub scraper: FetchConfig,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub paths: PathSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FocusAreaConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mode: AnalysisMode,
    #[serde(default)]
    pub subreddits: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Overrides `llm.provider` for this focus area.
    #[serde(default)]
    pub provider: Option<String>,
}

/// Model backend settings. `base_url` and `model` fall back to the provider preset.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Estimated prompt tokens per batch.
    pub token_budget: usize,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai-compatible".to_string(),
            base_url: None,
            model: None,
            api_key: None,
            max_tokens: 8000,
            temperature: 0.7,
            token_budget: 24_000,
            timeout_seconds: 300,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathSettings {
    pub data_dir: PathBuf,
    pub reports_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            reports_dir: PathBuf::from("reports"),
        }
    }
}

impl PathSettings {
    pub fn usage_file(&self) -> PathBuf {
        self.data_dir.join("usage.json")
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| IntelError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_yaml_str(&text)?;
        debug!(path = %path.display(), focus_areas = config.focus_areas.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text)
            .map_err(|e| IntelError::Config(format!("failed to parse config YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.llm.provider.parse::<Provider>()?;
        if self.llm.token_budget == 0 {
            return Err(IntelError::Config("llm.token_budget must be positive".to_string()));
        }
        for (id, area) in &self.focus_areas {
            if area.subreddits.is_empty() {
                return Err(IntelError::Config(format!("focus area '{}' has no subreddits", id)));
            }
            if let Some(provider) = &area.provider {
                provider.parse::<Provider>()?;
            }
        }
        if let Some(default) = &self.default_focus {
            if !self.focus_areas.contains_key(default) {
                return Err(IntelError::Config(format!(
                    "default_focus '{}' is not a configured focus area",
                    default
                )));
            }
        }
        Ok(())
    }

    /// Look up a focus area, or the default one when `id` is `None`.
    pub fn focus_area(&self, id: Option<&str>) -> Result<FocusArea> {
        let id = id
            .or(self.default_focus.as_deref())
            .or_else(|| self.focus_areas.keys().next().map(String::as_str))
            .ok_or_else(|| IntelError::Config("no focus areas configured".to_string()))?;
        let area = self
            .focus_areas
            .get(id)
            .ok_or_else(|| IntelError::UnknownFocusArea(id.to_string()))?;
        Ok(area.to_focus_area(id))
    }

    pub fn focus_areas(&self) -> Vec<FocusArea> {
        self.focus_areas
            .iter()
            .map(|(id, area)| area.to_focus_area(id))
            .collect()
    }
}

impl FocusAreaConfig {
    fn to_focus_area(&self, id: &str) -> FocusArea {
        FocusArea {
            id: id.to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            mode: self.mode,
            communities: self.subreddits.clone(),
            keywords: self.keywords.clone(),
            provider: self.provider.clone(),
        }
    }
}
