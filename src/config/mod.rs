//! Layered configuration
//!
//! Precedence, lowest first:
//! 1. Built-in defaults
//! 2. User config (`$XDG_CONFIG_HOME/chainloop/config.toml`)
//! 3. `CHAINLOOP_*` environment variables
//! 4. CLI flags

mod defaults;
mod effective;
mod merge;

pub use defaults::{CasConfig, CrafterConfig, DEFAULT_MAX_INLINE_BYTES, DEFAULT_PROGRESS_BUFFER};
pub use effective::{
    default_user_config_path, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig,
    MAX_CHUNK_SIZE,
};
pub use merge::{deep_merge, env_layer, merge_layers, ENV_PREFIX};
