//! Service configuration.
//!
//! Defaults, then an optional YAML file, then environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};
use crate::llm::LlmConfig;
use crate::specialists::{DatasetCatalog, DEFAULT_DATASETS};
use crate::supervisor::RouterConfig;

/// Top-level configuration of the dispatch service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub port: u16,
    /// Maximum capability invocations per request.
    pub max_depth: usize,
    pub invocation_timeout_secs: u64,
    pub reasoning_timeout_secs: u64,
    /// Sample triangles users may select; the first is the default.
    pub datasets: Vec<String>,
    /// Base URL of the actuarial computation service.
    pub backend_url: String,
    pub llm: LlmConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            port: 7860,
            max_depth: 6,
            invocation_timeout_secs: 120,
            reasoning_timeout_secs: 120,
            datasets: DEFAULT_DATASETS.iter().map(|s| s.to_string()).collect(),
            backend_url: "http://127.0.0.1:8000".to_string(),
            llm: LlmConfig::default(),
        }
    }
}

impl DispatchConfig {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load from a YAML file; missing keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> DispatchResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&raw)
            .map_err(|e| DispatchError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Overlay `PORT`, `DISPATCH_MAX_DEPTH`, `DISPATCH_INVOCATION_TIMEOUT`,
    /// `RESERVING_BACKEND_URL` and the `OPENAI_*` variables.
    ///
    /// Unparseable numbers are ignored with a warning.
    pub fn apply_env(&mut self) {
        if let Some(port) = env_parse("PORT") {
            self.port = port;
        }
        if let Some(depth) = env_parse("DISPATCH_MAX_DEPTH") {
            self.max_depth = depth;
        }
        if let Some(secs) = env_parse("DISPATCH_INVOCATION_TIMEOUT") {
            self.invocation_timeout_secs = secs;
        }
        if let Ok(url) = std::env::var("RESERVING_BACKEND_URL") {
            self.backend_url = url;
        }
        self.llm.apply_env();
    }

    pub fn validate(&self) -> DispatchResult<()> {
        if self.max_depth == 0 {
            return Err(DispatchError::Config(
                "max_depth must be at least 1".to_string(),
            ));
        }
        if self.datasets.is_empty() {
            return Err(DispatchError::Config(
                "datasets must list at least one triangle".to_string(),
            ));
        }
        Ok(())
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_depth: self.max_depth,
            invocation_timeout: Duration::from_secs(self.invocation_timeout_secs),
            reasoning_timeout: Duration::from_secs(self.reasoning_timeout_secs),
        }
    }

    pub fn catalog(&self) -> DispatchResult<DatasetCatalog> {
        DatasetCatalog::new(self.datasets.clone())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring {}={:?}: not a valid number", name, raw);
            None
        }
    }
}
