use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use dr_core::ResearchConfig;
use dr_providers::DEFAULT_BASE_URL;
use dr_tools::{SearchTopic, DEFAULT_TAVILY_URL};

pub const DEFAULT_MODEL: &str = "qwen3:14b";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderEntry,

    #[serde(default)]
    pub search: SearchEntry,

    #[serde(default)]
    pub research: ResearchConfig,

    #[serde(default)]
    pub handoff: HandoffEntry,
}

/// OpenAI-compatible chat endpoint (Ollama by default)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    /// Extra parameters to pass to the API (e.g., num_ctx, chat_template_kwargs)
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for ProviderEntry {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: 0.0,
            parameters: HashMap::new(),
        }
    }
}

/// Web search provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_search_url")]
    pub base_url: String,

    #[serde(default)]
    pub topic: SearchTopic,

    #[serde(default)]
    pub include_raw_content: bool,
}

fn default_search_url() -> String {
    DEFAULT_TAVILY_URL.to_string()
}

impl Default for SearchEntry {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_search_url(),
            topic: SearchTopic::General,
            include_raw_content: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandoffEntry {
    /// Path to the handoff database (supports $HOME, ~). Unset disables the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
}

/// Expand environment variables in a path string
/// Supports: $VAR, ${VAR}, ~
pub fn expand_path(path: &str) -> PathBuf {
    let mut result = path.to_string();

    // Expand ~ at the start
    if result.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            result = format!("{}{}", home.display(), &result[1..]);
        }
    } else if result == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }

    let re = match regex::Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?") {
        Ok(re) => re,
        Err(_) => return PathBuf::from(result),
    };
    let expanded = re.replace_all(&result, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    });

    PathBuf::from(expanded.to_string())
}

impl Config {
    /// Layered load: defaults, TOML file, `DR_` variables, then the
    /// `OLLAMA_*`/`TAVILY_API_KEY` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if path.is_some() && !config_path.exists() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        }

        let config: Config = Self::figment(&config_path)
            .extract()
            .with_context(|| format!("Invalid configuration (file: {})", config_path.display()))?;

        config
            .research
            .validate()
            .context("Invalid [research] configuration")?;

        Ok(config)
    }

    fn figment(config_path: &Path) -> Figment {
        Self::base_figment()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("DR_").split("__"))
            .merge(Env::raw().only(&["OLLAMA_MODEL"]).map(|_| "provider.model".into()))
            .merge(Env::raw().only(&["OLLAMA_BASE_URL"]).map(|_| "provider.base_url".into()))
            .merge(Env::raw().only(&["TAVILY_API_KEY"]).map(|_| "search.api_key".into()))
    }

    fn base_figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("dr"))
    }

    pub fn handoff_path(&self) -> Option<PathBuf> {
        self.handoff.db.as_deref().map(expand_path)
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        let mask = |key: &mut Option<String>| {
            if key.is_some() {
                *key = Some("(configured)".to_string());
            }
        };
        mask(&mut config.provider.api_key);
        mask(&mut config.search.api_key);
        config
    }
}
