//! Effective configuration with provenance
//!
//! Records the merged configuration plus where each layer came from, so
//! `crafter status` can explain why a setting has the value it has.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ci_runners::Environment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::defaults::CrafterConfig;
use super::merge::{env_layer, merge_layers};

/// Largest accepted upload frame
pub const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Origin of a configuration layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    User,
    Env,
    Cli,
}

/// A contributing layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (user layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes (user layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Variables read (env layer only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,
}

impl ConfigSource {
    fn plain(origin: ConfigOrigin) -> Self {
        Self {
            origin,
            path: None,
            digest: None,
            variables: Vec::new(),
        }
    }
}

/// Merged configuration and its sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub created_at: DateTime<Utc>,

    /// Merged configuration object
    pub merged: Value,

    /// Contributing layers in precedence order
    pub sources: Vec<ConfigSource>,

    #[serde(skip)]
    config: CrafterConfig,
}

impl EffectiveConfig {
    /// Merge builtin defaults, the user file (skipped when missing), the
    /// `CHAINLOOP_*` environment and CLI overrides.
    pub fn build(
        user_config_path: Option<&Path>,
        env: &dyn Environment,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![CrafterConfig::default().to_value()];
        let mut sources = vec![ConfigSource::plain(ConfigOrigin::Builtin)];

        if let Some(path) = user_config_path.filter(|p| p.exists()) {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                path: Some(path.to_string_lossy().into_owned()),
                digest: Some(digest),
                ..ConfigSource::plain(ConfigOrigin::User)
            });
        }

        if let Some((value, variables)) = env_layer(env) {
            layers.push(value);
            sources.push(ConfigSource {
                variables,
                ..ConfigSource::plain(ConfigOrigin::Env)
            });
        }

        if let Some(cli) = cli_overrides.filter(|v| v.as_object().is_some_and(|m| !m.is_empty())) {
            layers.push(cli);
            sources.push(ConfigSource::plain(ConfigOrigin::Cli));
        }

        let merged = merge_layers(layers);
        let config: CrafterConfig = serde_json::from_value(merged.clone())
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        validate(&config)?;

        Ok(Self {
            created_at: Utc::now(),
            merged,
            sources,
            config,
        })
    }

    pub fn config(&self) -> &CrafterConfig {
        &self.config
    }

    pub fn into_config(self) -> CrafterConfig {
        self.config
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// `$XDG_CONFIG_HOME/chainloop/config.toml`, falling back to `~/.config`
pub fn default_user_config_path(env: &dyn Environment) -> Option<PathBuf> {
    let base = env
        .get_non_empty("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env.get_non_empty("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("chainloop").join("config.toml"))
}

/// Parse a TOML file into a JSON value, returning it with its digest
fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let contents = String::from_utf8(bytes)
        .map_err(|e| ConfigError::Parse(format!("{}: invalid UTF-8: {}", path.display(), e)))?;
    let value: Value = toml::from_str(&contents)
        .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
    Ok((value, digest))
}

fn validate(config: &CrafterConfig) -> Result<(), ConfigError> {
    if config.cas.chunk_size == 0 || config.cas.chunk_size > MAX_CHUNK_SIZE {
        return Err(ConfigError::Validation(format!(
            "cas.chunk_size must be in (0, {}]",
            MAX_CHUNK_SIZE
        )));
    }
    if config.cas.progress_buffer == 0 {
        return Err(ConfigError::Validation(
            "cas.progress_buffer must be greater than 0".to_string(),
        ));
    }
    if config.log_level.trim().is_empty() {
        return Err(ConfigError::Validation("log_level must not be empty".to_string()));
    }
    if config.state_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("state_path must not be empty".to_string()));
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Validation(String),
}
