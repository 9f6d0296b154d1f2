use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub assistant: AssistantSettings,
    #[serde(default)]
    pub auth: AuthSettings,
}

#[derive(Debug, Clone)]
pub struct ProviderDef {
    pub id: &'static str,
    pub name: &'static str,
    pub env_var: &'static str,
    pub default_base_url: &'static str,
    pub supports_device_code: bool,
}

pub const BUILT_IN_PROVIDERS: &[ProviderDef] = &[
    ProviderDef { id: "github-copilot", name: "GitHub Copilot", env_var: "GITHUB_TOKEN",
                  default_base_url: "https://api.githubcopilot.com",
                  supports_device_code: true },
    ProviderDef { id: "openai", name: "OpenAI", env_var: "OPENAI_API_KEY",
                  default_base_url: "https://api.openai.com/v1",
                  supports_device_code: false },
];

pub fn find_provider_def(id: &str) -> Option<&'static ProviderDef> {
    BUILT_IN_PROVIDERS.iter().find(|p| p.id == id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider")]
    pub default: String,
    #[serde(default, flatten)]
    pub providers: HashMap<String, ProviderEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ProviderConfig {
    pub fn entry(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.get(name)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default: default_provider(),
            providers: HashMap::new(),
        }
    }
}

/// Per-request chat settings and the tool loop bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantSettings {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_tool_steps")]
    pub max_tool_steps: u32,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            max_tool_steps: default_max_tool_steps(),
            system_prompt: None,
        }
    }
}

/// Endpoints and client identity for the device authorization grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_device_code_url")]
    pub device_code_url: String,
    #[serde(default = "default_access_token_url")]
    pub access_token_url: String,
    #[serde(default = "default_token_exchange_url")]
    pub token_exchange_url: String,
    #[serde(default = "default_slow_down_step_secs")]
    pub slow_down_step_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            scope: default_scope(),
            device_code_url: default_device_code_url(),
            access_token_url: default_access_token_url(),
            token_exchange_url: default_token_exchange_url(),
            slow_down_step_secs: default_slow_down_step_secs(),
            default_interval_secs: default_interval_secs(),
        }
    }
}

fn default_provider() -> String {
    "github-copilot".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_top_p() -> f32 {
    1.0
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_tool_steps() -> u32 {
    8
}

fn default_client_id() -> String {
    "Iv1.b507a08c87ecfe98".to_string()
}

fn default_scope() -> String {
    "read:user".to_string()
}

fn default_device_code_url() -> String {
    "https://github.com/login/device/code".to_string()
}

fn default_access_token_url() -> String {
    "https://github.com/login/oauth/access_token".to_string()
}

fn default_token_exchange_url() -> String {
    "https://api.github.com/copilot_internal/v2/token".to_string()
}

fn default_slow_down_step_secs() -> u64 {
    5
}

fn default_interval_secs() -> u64 {
    5
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("searchdesk")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("searchdesk")
    }

    pub fn ensure_dirs() -> Result<()> {
        std::fs::create_dir_all(Self::config_dir())?;
        std::fs::create_dir_all(Self::data_dir())?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        Self::ensure_dirs()?;
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Base URL set in the provider's table, if any.
    pub fn base_url_override(&self, provider: &str) -> Option<String> {
        self.provider
            .entry(provider)
            .and_then(|e| e.base_url.clone())
            .filter(|u| !u.trim().is_empty())
    }

    /// Configured base URL, else the built-in default for known providers.
    pub fn base_url_for(&self, provider: &str) -> Option<String> {
        self.base_url_override(provider).or_else(|| {
            find_provider_def(provider).map(|def| def.default_base_url.to_string())
        })
    }

    /// Model for a provider: provider entry first, then the assistant section.
    pub fn model_for(&self, provider: &str) -> Option<String> {
        self.provider
            .entry(provider)
            .and_then(|e| e.model.clone())
            .or_else(|| self.assistant.model.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.provider.default, "github-copilot");
        assert_eq!(config.assistant.max_tool_steps, 8);
        assert_eq!(config.assistant.max_tokens, 4096);
        assert_eq!(config.auth.slow_down_step_secs, 5);
        assert_eq!(config.auth.scope, "read:user");
    }

    #[test]
    fn provider_tables_are_flattened() {
        let config: Config = toml::from_str(
            r#"
            [provider]
            default = "openai"

            [provider.openai]
            api_key = "sk-test"
            model = "gpt-4.1"

            [assistant]
            temperature = 0.7
            max_tool_steps = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.provider.default, "openai");
        let entry = config.provider.entry("openai").unwrap();
        assert_eq!(entry.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model_for("openai").as_deref(), Some("gpt-4.1"));
        assert_eq!(config.assistant.max_tool_steps, 3);
        assert!((config.assistant.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn model_falls_back_to_assistant_section() {
        let mut config = Config::default();
        assert!(config.model_for("github-copilot").is_none());
        config.assistant.model = Some("gpt-4o".into());
        assert_eq!(config.model_for("github-copilot").as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.assistant.system_prompt = Some("Be brief.".into());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.assistant.system_prompt.as_deref(), Some("Be brief."));
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(loaded.provider.default, "github-copilot");
    }

    #[test]
    fn built_in_lookup() {
        assert!(find_provider_def("github-copilot").unwrap().supports_device_code);
        assert!(!find_provider_def("openai").unwrap().supports_device_code);
        assert!(find_provider_def("gemini").is_none());
    }

    #[test]
    fn base_url_prefers_configured_value() {
        let mut config = Config::default();
        assert_eq!(
            config.base_url_for("openai").as_deref(),
            Some("https://api.openai.com/v1")
        );
        assert!(config.base_url_override("openai").is_none());
        assert!(config.base_url_for("azure-openai").is_none());

        config.provider.providers.insert(
            "openai".into(),
            ProviderEntry {
                base_url: Some("https://proxy.test/v1".into()),
                ..Default::default()
            },
        );
        assert_eq!(config.base_url_for("openai").as_deref(), Some("https://proxy.test/v1"));

        config.provider.providers.insert(
            "github-copilot".into(),
            ProviderEntry {
                base_url: Some("  ".into()),
                ..Default::default()
            },
        );
        assert_eq!(
            config.base_url_for("github-copilot").as_deref(),
            Some("https://api.githubcopilot.com")
        );
    }
}
