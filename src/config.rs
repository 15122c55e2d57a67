use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_ENV: &str = "SWITCHYARD_CONFIG";
const CONFIG_FILE_NAME: &str = "switchyard.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read bridge config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invoke channel {0:?} is not a dotted identifier path")]
    InvalidChannel(String),
}

/// Bridge settings shared by every window built from them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Script expression generated stubs call with the JSON invoke payload.
    pub invoke_channel: String,
    /// Push bound state back into the script environment after every handled invoke.
    pub sync_after_invoke: bool,
    /// Upper bound on promise jobs drained after a single evaluation.
    pub max_pending_jobs: usize,
    /// Object/array state larger than this many bytes is pushed as `JSON.parse('...')`.
    pub json_parse_threshold: usize,
    /// Fallback `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            invoke_channel: "window.external.invoke".to_string(),
            sync_after_invoke: true,
            max_pending_jobs: 1000,
            json_parse_threshold: 10_240,
            log_filter: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)?;
                serde_yaml::from_str::<BridgeConfig>(&contents)?
            }
            _ => BridgeConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from `$SWITCHYARD_CONFIG`, else from the platform config directory.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(default_config_path);
        Self::load(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = !self.invoke_channel.is_empty()
            && self.invoke_channel.split('.').all(is_script_identifier);
        if valid {
            Ok(())
        } else {
            Err(ConfigError::InvalidChannel(self.invoke_channel.clone()))
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "switchyard", "switchyard")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Whether `name` can be used verbatim as a script identifier.
pub(crate) fn is_script_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
