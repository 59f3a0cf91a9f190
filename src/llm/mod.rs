//! Hosted language-model settings and the model-backed reasoning capability.

pub mod openai;

use serde::{Deserialize, Serialize};

pub use openai::OpenAiReasoner;

/// Settings for the hosted chat-completions model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f64,
    /// API key; requests may also supply their own.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Retries on rate limiting and server errors.
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4.1".to_string(),
            temperature: 0.0,
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

impl LlmConfig {
    /// Overlay `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `OPENAI_MODEL`.
    pub fn apply_env(&mut self) {
        if let Some(key) = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
        {
            self.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            self.model = model;
        }
    }

    /// Whether a key is configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().map_or(false, |k| !k.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LlmConfig::default();
        assert_eq!(config.model, "gpt-4.1");
        assert_eq!(config.temperature, 0.0);
        assert!(!config.has_api_key());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: LlmConfig = serde_yaml::from_str("model: gpt-4o\nmax_retries: 5\n").unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_blank_key_is_not_a_key() {
        let config = LlmConfig {
            api_key: Some("  ".into()),
            ..LlmConfig::default()
        };
        assert!(!config.has_api_key());
    }
}
