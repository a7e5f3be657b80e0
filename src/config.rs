use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "ampliflow.yaml";

/// Project-level settings read from `ampliflow.yaml` in the project root.
/// Every field has a default, so the file itself is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PilotConfig {
    #[serde(default = "default_toolkit")]
    pub toolkit: String,
    #[serde(default = "default_biom")]
    pub biom: String,
    #[serde(default = "default_environment_prefix")]
    pub environment_prefix: String,
    #[serde(default = "default_true")]
    pub require_environment: bool,
    #[serde(default = "default_prompt_timeout")]
    pub prompt_timeout_secs: u64,
    #[serde(default = "default_sepp_reference")]
    pub sepp_reference: PathBuf,
    #[serde(default = "default_classifier")]
    pub default_classifier: PathBuf,
}

fn default_toolkit() -> String {
    "qiime".to_string()
}

fn default_biom() -> String {
    "biom".to_string()
}

fn default_environment_prefix() -> String {
    "qiime2".to_string()
}

fn default_true() -> bool {
    true
}

fn default_prompt_timeout() -> u64 {
    120
}

fn default_sepp_reference() -> PathBuf {
    PathBuf::from("data/raw/sepp-refs-gg-13-8.qza")
}

fn default_classifier() -> PathBuf {
    PathBuf::from("data/interim/classifiers/silva-138-99-515-806/classifier.qza")
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            toolkit: default_toolkit(),
            biom: default_biom(),
            environment_prefix: default_environment_prefix(),
            require_environment: default_true(),
            prompt_timeout_secs: default_prompt_timeout(),
            sepp_reference: default_sepp_reference(),
            default_classifier: default_classifier(),
        }
    }
}

impl PilotConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: PilotConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config YAML: {}", path.display()))?;
        Ok(config)
    }

    /// Loads `<project>/ampliflow.yaml` when present, defaults otherwise.
    pub fn discover(project_root: &Path) -> Result<Self> {
        let path = project_root.join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// `None` means prompts wait indefinitely.
    pub fn prompt_timeout(&self) -> Option<Duration> {
        (self.prompt_timeout_secs > 0).then(|| Duration::from_secs(self.prompt_timeout_secs))
    }

    pub fn resolve_path(&self, project_root: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            project_root.join(path)
        }
    }
}
